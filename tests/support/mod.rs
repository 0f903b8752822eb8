//! Shared helpers for the integration tests.

use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

/// Route `tracing` output through the test harness, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Thread-safe collector handlers push received data into.
pub type Sink<T> = Arc<Mutex<Vec<T>>>;

pub fn sink<T>() -> Sink<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return condition();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
