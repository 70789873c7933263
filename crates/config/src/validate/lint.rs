//! Configuration linting
//!
//! Flags settings that are accepted but commonly lead to failed or
//! needlessly exposed challenges.

use super::{ValidationResult, ValidationWarning};
use crate::listener::DEFAULT_TLS_PORT;
use crate::Config;

/// Delay above which the listener stays exposed for an unusually long time
const LONG_DELAY_SECS: u64 = 60;

/// Validity above which the throwaway certificate outlives any realistic challenge
const LONG_VALIDITY_SECS: u64 = 86400;

/// Lint configuration for common mistakes
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    match config.listener.port {
        0 => result.add_warning(ValidationWarning::new(
            "Listener port is 0 (OS-assigned); certificate authorities only connect to port 443",
        )),
        DEFAULT_TLS_PORT => {}
        port => result.add_warning(ValidationWarning::new(format!(
            "Listener port is {}; certificate authorities connect to port 443, \
             so traffic must be forwarded to this port",
            port
        ))),
    }

    if config.challenge.delay_secs > LONG_DELAY_SECS {
        result.add_warning(ValidationWarning::new(format!(
            "Challenge delay of {}s keeps the listener open longer than necessary",
            config.challenge.delay_secs
        )));
    }

    if config.challenge.certificate_validity_secs > LONG_VALIDITY_SECS {
        result.add_warning(ValidationWarning::new(format!(
            "Challenge certificate validity of {}s is longer than one day",
            config.challenge.certificate_validity_secs
        )));
    }

    result
}
