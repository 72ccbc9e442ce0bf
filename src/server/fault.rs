//! Simulated device faults.
//!
//! A fault is not a Modbus exception: it models a device that stops
//! answering, so the connection carrying the request is dropped.

use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use rand::Rng as _;
use thiserror::Error;

use crate::frame::Header;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum FaultPolicyError {
    #[error("Error rate must be within [0, 1], got {0}")]
    ErrorRate(f64),
    #[error("Response delay must be a non-negative number of seconds, got {0}")]
    Delay(f64),
}

/// Simulated transport failure for one request.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Simulated device fault for {hdr:?}")]
pub struct SimulatedFault {
    pub hdr: Header,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultPolicy {
    error_rate: f64,
    response_delay: Duration,
}

impl FaultPolicy {
    pub fn new(error_rate: f64, delay_seconds: f64) -> Result<Self, FaultPolicyError> {
        if !(0.0..=1.0).contains(&error_rate) {
            return Err(FaultPolicyError::ErrorRate(error_rate));
        }
        let response_delay = Duration::try_from_secs_f64(delay_seconds)
            .map_err(|_| FaultPolicyError::Delay(delay_seconds))?;
        Ok(Self {
            error_rate,
            response_delay,
        })
    }

    #[must_use]
    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    #[must_use]
    pub fn response_delay(&self) -> Duration {
        self.response_delay
    }

    /// 按错误率抽样，决定本次请求是否失败
    fn roll(&self) -> bool {
        self.error_rate > 0.0 && rand::rng().random_bool(self.error_rate)
    }
}

/// Shared toggle for fault injection; disabled until a policy is set.
#[derive(Debug, Default)]
pub struct FaultInjector {
    policy: RwLock<Option<FaultPolicy>>,
}

impl FaultInjector {
    pub fn set(&self, policy: FaultPolicy) {
        log::info!(
            "Fault injection enabled: error_rate={}, delay={:?}",
            policy.error_rate,
            policy.response_delay
        );
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Some(policy);
    }

    pub fn clear(&self) {
        log::info!("Fault injection disabled");
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn policy(&self) -> Option<FaultPolicy> {
        *self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay to apply before answering and whether the request must fail.
    pub(crate) fn plan(&self) -> (Duration, bool) {
        match self.policy() {
            Some(policy) => (policy.response_delay, policy.roll()),
            None => (Duration::ZERO, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_validation() {
        assert!(FaultPolicy::new(0.0, 0.0).is_ok());
        assert!(FaultPolicy::new(1.0, 2.5).is_ok());
        assert_eq!(
            FaultPolicy::new(1.5, 0.0),
            Err(FaultPolicyError::ErrorRate(1.5))
        );
        assert!(matches!(
            FaultPolicy::new(f64::NAN, 0.0),
            Err(FaultPolicyError::ErrorRate(_))
        ));
        assert_eq!(
            FaultPolicy::new(0.5, -1.0),
            Err(FaultPolicyError::Delay(-1.0))
        );
        assert!(FaultPolicy::new(0.5, f64::INFINITY).is_err());
    }

    #[test]
    fn injector_is_disabled_by_default() {
        let injector = FaultInjector::default();
        assert_eq!(injector.policy(), None);
        assert_eq!(injector.plan(), (Duration::ZERO, false));
    }

    #[test]
    fn injector_extremes() {
        let injector = FaultInjector::default();
        injector.set(FaultPolicy::new(1.0, 0.25).unwrap());
        for _ in 0..50 {
            assert_eq!(injector.plan(), (Duration::from_millis(250), true));
        }

        injector.set(FaultPolicy::new(0.0, 0.0).unwrap());
        for _ in 0..50 {
            assert_eq!(injector.plan(), (Duration::ZERO, false));
        }

        injector.clear();
        assert_eq!(injector.policy(), None);
    }
}
