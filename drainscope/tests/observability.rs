//! Global subscriber installation.
//!
//! Lives in its own test binary so the subscriber it installs never leaks
//! into the library's unit tests.

use drainscope::observability::{init_tracing, LogFormat};

#[test]
fn test_second_init_is_harmless() {
    assert!(init_tracing("drainscope=debug", LogFormat::Text));
    assert!(!init_tracing("drainscope=debug", LogFormat::Json));
    tracing::info!("still logging through the first subscriber");
}
