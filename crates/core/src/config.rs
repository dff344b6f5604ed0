// crates/core/src/config.rs
//! Guard and tracker timing configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Longest lease the guard will grant. Anything above it is rejected as invalid.
pub const MAX_LEASE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lease and retention timings shared by the guard, the tracker and workers.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Validity window granted on admission and on every renewal.
    pub lease: Duration,
    /// Interval at which running jobs renew their lease.
    pub heartbeat: Duration,
    /// How long terminal records stay queryable.
    pub retention: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            heartbeat: Duration::from_secs(60),
            retention: Duration::from_secs(3600),
        }
    }
}

impl GuardConfig {
    /// Reject timings that would let a healthy job lose its lock between heartbeats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease.is_zero() {
            return Err(ConfigError::ZeroLease);
        }
        if self.lease > MAX_LEASE {
            return Err(ConfigError::LeaseTooLong {
                lease: self.lease,
                max: MAX_LEASE,
            });
        }
        if self.heartbeat.is_zero() {
            return Err(ConfigError::ZeroHeartbeat);
        }
        if self.heartbeat >= self.lease {
            return Err(ConfigError::HeartbeatNotShorter {
                heartbeat: self.heartbeat,
                lease: self.lease,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(GuardConfig::default().validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_lease() {
        let config = GuardConfig {
            lease: Duration::from_secs(10),
            heartbeat: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HeartbeatNotShorter { .. })
        ));
    }

    #[test]
    fn test_zero_lease_rejected() {
        let config = GuardConfig {
            lease: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroLease));
    }

    #[test]
    fn test_unbounded_lease_rejected() {
        let config = GuardConfig {
            lease: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::LeaseTooLong {
                lease: Duration::from_secs(u64::MAX),
                max: MAX_LEASE,
            })
        );

        let at_limit = GuardConfig {
            lease: MAX_LEASE,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }
}
