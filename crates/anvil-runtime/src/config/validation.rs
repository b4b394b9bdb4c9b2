//! Configuration validation.

use anvil_framework::DispatchConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{AnvilConfig, LogOutput, LoggingConfig, StorageConfig};

/// Checks values the schema alone cannot rule out.
pub fn validate_config(config: &AnvilConfig) -> ConfigResult<()> {
    validate_dispatch_config(&config.dispatch)?;
    validate_storage_config(&config.storage)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.concurrency == 0 {
        return Err(ConfigError::validation(
            "dispatch.concurrency must be greater than 0",
        ));
    }

    if dispatch.prefixes.is_empty() {
        return Err(ConfigError::validation(
            "dispatch.prefixes must contain at least one prefix",
        ));
    }

    if let Some(idx) = dispatch.prefixes.iter().position(|p| p.is_empty()) {
        return Err(ConfigError::validation(format!(
            "dispatch.prefixes[{idx}] is empty"
        )));
    }

    if dispatch.storage.is_empty() {
        return Err(ConfigError::validation("dispatch.storage cannot be empty"));
    }

    Ok(())
}

fn validate_storage_config(storage: &StorageConfig) -> ConfigResult<()> {
    if storage.max_keys == 0 {
        return Err(ConfigError::validation(
            "storage.max_keys must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is 'file'",
        ));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(
            "logging.filters cannot contain an empty module name",
        ));
    }

    Ok(())
}
