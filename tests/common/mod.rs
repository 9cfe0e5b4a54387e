//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Installs a test-friendly subscriber once per test binary.
///
/// `RUST_LOG` overrides the default `lane_queue=debug` filter.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("lane_queue=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Execution log shared between a test and the tasks it submits.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A task body that appends `label` when it runs.
    pub fn task(&self, label: impl Into<String>) -> impl FnOnce() + Send + 'static {
        let log = Arc::clone(&self.0);
        let label = label.into();
        move || log.lock().unwrap().push(label)
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
