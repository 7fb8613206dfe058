//!
//! Unit tests
//!
//! Process level tests live in the worker crate which provides
//! the actual worker executable.
//!
use std::sync::Once;

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
