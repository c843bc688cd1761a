use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Water marks are ordered and non-zero
/// - The worker pool has workers and tasks get at least one attempt
/// - Queue leases and decoder limits are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.server.port == 0 {
        return fail("server.port cannot be 0");
    }

    let admission = &config.admission;
    if admission.hard_water_mark == 0 {
        return fail("admission.hard_water_mark cannot be 0");
    }
    if admission.high_water_mark > admission.hard_water_mark {
        return fail("admission.high_water_mark cannot exceed admission.hard_water_mark");
    }
    if admission.tenant_hard_limit == Some(0) {
        return fail("admission.tenant_hard_limit cannot be 0");
    }

    if config.processor.workers == 0 {
        return fail("processor.workers cannot be 0");
    }
    if config.processor.retry.max_attempts == 0 {
        return fail("processor.retry.max_attempts cannot be 0");
    }

    if config.queue.visibility_timeout_secs == 0 {
        return fail("queue.visibility_timeout_secs cannot be 0");
    }
    if config.decoder.max_record_bytes == 0 {
        return fail("decoder.max_record_bytes cannot be 0");
    }

    Ok(())
}
