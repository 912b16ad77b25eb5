use thiserror::Error;

/// Result alias used throughout the core. Every operation returns a total
/// value; there is no unwind-based error path.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the hardware core.
///
/// Backend-level failures are logged and collapsed into `Generic` at phase
/// boundaries; per-meta-entity errors are surfaced verbatim so the plant
/// can choose its failover action.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// One or more sub-operations failed; details were logged.
    #[error("generic failure")]
    Generic,

    /// Bad argument, out-of-range identifier, or invalid cached value.
    #[error("invalid argument or value")]
    Invalid,

    /// The targeted backend is not online.
    #[error("backend offline")]
    Offline,

    /// The backend does not support the requested operation.
    #[error("operation not implemented")]
    NotImplemented,

    /// The entity has no usable configuration.
    #[error("not configured")]
    NotConfigured,

    /// Name lookup found no match.
    #[error("not found")]
    NotFound,

    /// Name or grab collision.
    #[error("already exists")]
    Exists,

    /// A fixed-capacity table is full.
    #[error("out of storage")]
    Oom,

    /// A transfer returned fewer elements than configured.
    #[error("truncated data")]
    Truncated,

    /// A source sample is older than the staleness bound.
    #[error("stale sample")]
    Stale,

    /// Failure with no further classification.
    #[error("unknown error")]
    Unknown,

    /// Sensor reported a semantically invalid value.
    #[error("sensor value out of range")]
    SensorInvalid,

    /// Sensor input reads as a short circuit.
    #[error("sensor short circuit")]
    SensorShort,

    /// Sensor input reads as an open circuit.
    #[error("sensor disconnected")]
    SensorDisconnected,
}

impl Error {
    /// True for the sensor-class errors a temperature consumer may want to
    /// handle separately from plumbing errors.
    pub fn is_sensor_fault(self) -> bool {
        matches!(
            self,
            Error::SensorInvalid | Error::SensorShort | Error::SensorDisconnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_fault_classification() {
        assert!(Error::SensorShort.is_sensor_fault());
        assert!(Error::SensorDisconnected.is_sensor_fault());
        assert!(Error::SensorInvalid.is_sensor_fault());
        assert!(!Error::Offline.is_sensor_fault());
        assert!(!Error::Invalid.is_sensor_fault());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::Offline.to_string(), "backend offline");
        assert_eq!(Error::Exists.to_string(), "already exists");
        assert_eq!(Error::Stale.to_string(), "stale sample");
    }
}
