//! Alarm sink seam.
//!
//! The core raises alarms on backend input/output phase failures and on
//! meta-input refresh failures whose missing-policy is not IGNORE. Alarm
//! presentation (UI, notification fan-out) lives outside the core; this
//! trait is the boundary.

use std::sync::Arc;

use tracing::warn;

use crate::error::Error;

pub trait AlarmSink: Send + Sync {
    fn raise(&self, code: Error, message: &str);
}

/// Default sink: structured warning per alarm.
pub struct TracingAlarms;

impl AlarmSink for TracingAlarms {
    fn raise(&self, code: Error, message: &str) {
        warn!(code = %code, "{message}");
    }
}

pub fn tracing_alarms() -> Arc<dyn AlarmSink> {
    Arc::new(TracingAlarms)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Test sink collecting raised alarms for assertions.
    #[derive(Default)]
    pub struct CollectingAlarms {
        raised: Mutex<Vec<(Error, String)>>,
    }

    impl CollectingAlarms {
        pub fn raised(&self) -> Vec<(Error, String)> {
            self.raised.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn count(&self) -> usize {
            self.raised.lock().unwrap_or_else(|e| e.into_inner()).len()
        }
    }

    impl AlarmSink for CollectingAlarms {
        fn raise(&self, code: Error, message: &str) {
            self.raised
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((code, message.to_string()));
        }
    }
}
