//! Streaming endpoint for capture fragments.
//!
//! ARCHITECTURE
//! ============
//! A capture device (headset or phone) holds one WebSocket open and streams
//! fragments: camera frames plus pose data. Every fragment that decodes is
//! handed to a `FragmentProcessor` and answered with `{"Status": ...}`.
//! Undecodable messages are dropped without a reply; the connection stays up.
//!
//! ```text
//! server (accept) ─► routes::ws (upgrade, one task per socket)
//!                      └─► connection::run ⇄ transport ⇄ client
//!                             └─► fragment::decode ─► processor ─► fragment::encode
//! ```

pub mod config;
pub mod connection;
pub mod fragment;
pub mod processor;
pub mod routes;
pub mod server;
pub mod state;
pub mod transport;
