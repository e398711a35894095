use super::*;
use crate::processor::StubProcessor;

#[test]
fn registry_new_is_empty() {
    let registry = ConnectionRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
    assert!(registry.snapshot().is_empty());
}

#[test]
fn guard_registers_and_unregisters() {
    let registry = ConnectionRegistry::new();
    let peer: SocketAddr = "10.0.0.7:5555".parse().unwrap();

    let guard = registry.register(Some(peer));
    assert_eq!(registry.len(), 1);
    let snapshot = registry.snapshot();
    assert_eq!(snapshot[0].id, guard.id());
    assert_eq!(snapshot[0].peer, Some(peer));
    assert_eq!(snapshot[0].fragments, 0);

    drop(guard);
    assert!(registry.is_empty());
}

#[test]
fn record_fragment_counts_per_connection() {
    let registry = ConnectionRegistry::new();
    let a = registry.register(None);
    let b = registry.register(None);

    a.record_fragment();
    a.record_fragment();
    b.record_fragment();

    let snapshot = registry.snapshot();
    let count = |id: Uuid| snapshot.iter().find(|c| c.id == id).map(|c| c.fragments);
    assert_eq!(count(a.id()), Some(2));
    assert_eq!(count(b.id()), Some(1));
}

#[test]
fn guard_unregisters_on_panic_unwind() {
    let registry = ConnectionRegistry::new();
    let inner = registry.clone();

    let outcome = std::panic::catch_unwind(move || {
        let _guard = inner.register(None);
        panic!("handler blew up");
    });

    assert!(outcome.is_err());
    assert!(registry.is_empty());
}

#[test]
fn app_state_wraps_processor_when_history_enabled() {
    let state = test_helpers::test_app_state();
    assert_eq!(state.history.as_ref().map(FragmentHistory::capacity), Some(crate::config::DEFAULT_FRAGMENT_HISTORY));
    assert!(!state.shutdown.is_cancelled());
}

#[test]
fn app_state_without_history() {
    let config = ServerConfig { fragment_history: 0, ..ServerConfig::default() };
    let state = AppState::new(config, Arc::new(StubProcessor));
    assert!(state.history.is_none());
}
