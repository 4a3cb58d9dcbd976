//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert the first error into a `ConfigError`.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const MAX_SENSIBLE_CONCURRENCY: u32 = 256;

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_workers(config, &mut result);
        Self::validate_queues(config, &mut result);

        Ok(result)
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if !config.store.in_memory && config.store.path.trim().is_empty() {
            result.add_error(ValidationError::new(
                "store.path",
                "path cannot be empty unless in_memory is set",
            ));
        }

        if config.store.in_memory {
            result.add_warning(ValidationWarning::new(
                "store.in_memory",
                "in-memory store: jobs and cron tasks are lost on restart",
            ));
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        if config.scheduler.tick_interval_ms < 1000 {
            result.add_error(ValidationError::new(
                "scheduler.tick_interval_ms",
                "tick interval must be at least 1000ms",
            ));
        }

        if config.scheduler.evaluation_slots == 0 {
            result.add_error(ValidationError::new(
                "scheduler.evaluation_slots",
                "evaluation_slots must be greater than 0",
            ));
        }
    }

    fn validate_workers(config: &Config, result: &mut ValidationResult) {
        if config.workers.default_concurrency == 0 {
            result.add_error(ValidationError::new(
                "workers.default_concurrency",
                "default_concurrency must be greater than 0",
            ));
        }

        if config.workers.default_concurrency > MAX_SENSIBLE_CONCURRENCY {
            result.add_warning(ValidationWarning::new(
                "workers.default_concurrency",
                "default_concurrency is very high (>256)",
            ));
        }

        if config.workers.reconcile_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "workers.reconcile_interval_secs",
                "reconcile_interval_secs must be greater than 0",
            ));
        }

        if config.workers.shutdown_timeout_secs == 0 {
            result.add_warning(ValidationWarning::new(
                "workers.shutdown_timeout_secs",
                "shutdown timeout is 0: in-flight jobs will be failed immediately on shutdown",
            ));
        }
    }

    fn validate_queues(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, queue) in config.queues.iter().enumerate() {
            let path = format!("queues[{}]", i);

            if queue.name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    "queue name cannot be empty",
                ));
            } else if !seen.insert(queue.name.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.name", path),
                    format!("duplicate queue name '{}'", queue.name),
                ));
            }

            match (queue.capacity, queue.unbounded) {
                (Some(_), true) => result.add_error(ValidationError::new(
                    format!("{}.capacity", path),
                    "capacity cannot be combined with unbounded = true",
                )),
                (None, false) => result.add_error(ValidationError::new(
                    format!("{}.capacity", path),
                    "capacity is required unless unbounded = true",
                )),
                (Some(0), false) => result.add_error(ValidationError::new(
                    format!("{}.capacity", path),
                    "capacity must be greater than 0 (use unbounded = true for no limit)",
                )),
                _ => {}
            }

            match queue.concurrency {
                Some(0) => result.add_error(ValidationError::new(
                    format!("{}.concurrency", path),
                    "concurrency must be greater than 0",
                )),
                Some(n) if n > MAX_SENSIBLE_CONCURRENCY => {
                    result.add_warning(ValidationWarning::new(
                        format!("{}.concurrency", path),
                        "concurrency is very high (>256)",
                    ))
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
