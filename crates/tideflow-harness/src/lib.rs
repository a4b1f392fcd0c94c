#![forbid(unsafe_code)]

//! Test harness for tideflow.
//!
//! A [`Harness`] puts the calling thread's engine into a known state, records
//! every diagnostic, and drives the default tick queue until the scheduler
//! settles. [`CallLog`] records callback invocations; [`fixture`] builds
//! scopes and structures from JSON.
//!
//! ```ignore
//! let harness = Harness::new(Config::default());
//! let scope = fixture::scope("demo", json!({"a": 1}));
//! let log = CallLog::new();
//! scope.watch("a", |s| Ok(s.get("a")), log.recorder("a"));
//! scope.set("a", Value::from(2));
//! harness.settle();
//! assert_eq!(log.len(), 1);
//! ```

pub mod fixture;
pub mod probe;

pub use probe::{Call, CallLog};

use std::rc::Rc;

use tideflow_core::{Config, RecordingSink, runtime, scheduler};

/// Upper bound on ticks [`Harness::settle`] drains before giving up.
pub const MAX_SETTLE_TICKS: usize = 64;

/// Owns the thread's engine state for the duration of a test.
///
/// Dropping the harness resets the runtime again, so state never leaks into
/// the next test on the same thread.
pub struct Harness {
    sink: Rc<RecordingSink>,
}

impl Harness {
    /// Reset the runtime, install `config`, and start recording diagnostics.
    #[must_use]
    pub fn new(config: Config) -> Self {
        runtime::reset();
        runtime::configure(config);
        let sink = Rc::new(RecordingSink::new());
        runtime::set_diagnostics_sink(sink.clone());
        Self { sink }
    }

    /// Harness with async updates disabled: every trigger runs inline.
    #[must_use]
    pub fn sync() -> Self {
        Self::new(Config::default().with_async_updates(false))
    }

    /// Diagnostics reported since the harness was created.
    #[must_use]
    pub fn sink(&self) -> &RecordingSink {
        &self.sink
    }

    /// Drain the tick queue until it stays empty. Returns the number of
    /// ticks taken.
    pub fn settle(&self) -> usize {
        let queue = runtime::tick_queue();
        let mut ticks = 0;
        while !queue.is_empty() {
            if ticks == MAX_SETTLE_TICKS {
                tracing::warn!(
                    ticks,
                    pending = scheduler::pending_count(),
                    "tick queue did not settle"
                );
                break;
            }
            queue.drain();
            ticks += 1;
        }
        ticks
    }

    /// Whether nothing is waiting to run.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        runtime::tick_queue().is_empty() && scheduler::pending_count() == 0
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        runtime::reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideflow_core::Value;

    #[test]
    fn settle_runs_scheduled_flush() {
        let harness = Harness::default();
        let scope = fixture::scope("h", serde_json::json!({"a": 1}));
        let log = CallLog::new();
        scope.watch("a", |s| Ok(s.get("a")), log.recorder("a"));
        scope.set("a", Value::from(2));
        assert!(!harness.is_idle());
        assert_eq!(harness.settle(), 1);
        assert!(harness.is_idle());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn settle_on_idle_queue_is_zero() {
        let harness = Harness::sync();
        assert_eq!(harness.settle(), 0);
        assert!(harness.sink().is_empty());
    }
}
