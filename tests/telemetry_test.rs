//! Global subscriber installation. Kept in its own test binary because it
//! installs a process-wide dispatcher.

use chatrelay::telemetry::{SubscriberConfig, init_debug, init_default, init_subscriber};

#[test]
fn file_output_returns_guard_and_reinit_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let config = SubscriberConfig::builder()
        .log_file(dir.path().join("chatrelay.log"))
        .build();

    let guard = init_subscriber(config).unwrap();
    assert!(guard.is_some());

    assert!(init_default().unwrap().is_none());
    assert!(init_debug().unwrap().is_none());
}
