use crate::config::Config;
use crate::error::{Error, Result};

/// Validates the port range new instances are allocated from
pub fn validate_port_range(min_port: u16, max_port: u16) -> Result<()> {
    if min_port == 0 {
        return Err(Error::ConfigInvalid("minPort must be greater than 0".to_string()));
    }

    if min_port > max_port {
        return Err(Error::ConfigInvalid(format!(
            "minPort {} is greater than maxPort {}",
            min_port, max_port
        )));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    if config.binary.trim().is_empty() {
        return Err(Error::ConfigInvalid("binary must not be empty".to_string()));
    }

    validate_port_range(config.min_port, config.max_port)?;

    if config.password_length == 0 && config.generate_password {
        return Err(Error::ConfigInvalid(
            "passwordLength must be greater than 0 when generatePassword is enabled".to_string(),
        ));
    }

    if config.http.port == 0 {
        return Err(Error::ConfigInvalid("http.port must be greater than 0".to_string()));
    }

    if config.http.workers == Some(0) {
        return Err(Error::ConfigInvalid("http.workers must be greater than 0".to_string()));
    }

    Ok(())
}
