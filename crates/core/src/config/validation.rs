use crate::{SchedulerError, SchedulerResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> SchedulerResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a count is reasonable
    pub fn validate_count(count: usize, field_name: &str, max: usize) -> SchedulerResult<()> {
        if count == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate that an interval is positive and not absurdly long
    pub fn validate_interval_ms(interval_ms: u64, field_name: &str) -> SchedulerResult<()> {
        if interval_ms == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if interval_ms > 60_000 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be less than or equal to 60000"
            )));
        }
        Ok(())
    }

    /// Validate that a timeout is positive
    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> SchedulerResult<()> {
        if timeout_seconds == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }
}
