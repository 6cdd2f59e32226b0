//! Environment-variable configuration.
//!
//! Every option is read from one environment variable whose name is the
//! project prefix plus the sanitized option name: upper-cased, with every
//! non-alphanumeric character mapped to `_`. The full set of recognized
//! variables is available as a [`Variable`] table so the process can log
//! how it is configured.
//!
//! Unknown variables carrying the project prefix are rejected at startup;
//! a typoed `VENTIO_SERIAL_PROT` should fail loudly, not be ignored.

use std::collections::HashMap;

use serde::Serialize;
use tracing::level_filters::LevelFilter;

use crate::error::{Result, VentioError};

/// Prefix of all environment variables of this project.
pub const PREFIX: &str = "ventio";

const OPTION_SERIAL_PORT: &str = "serial-port";
const OPTION_LOG_LEVEL: &str = "log-level";

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// The runtime configuration of the process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the serial port device the ventilation bus is attached to.
    pub serial_port: String,
    /// Log level applied after startup.
    pub log_level: LevelFilter,
}

/// Describes one recognized environment variable.
#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    /// Full environment variable name.
    pub name: String,
    /// Value type, for the startup record.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Default applied when the variable is unset.
    pub default: &'static str,
    /// Whether the variable must be set.
    pub required: bool,
    /// Human-readable description.
    pub description: &'static str,
}

/// The table of all recognized environment variables.
pub fn variables() -> Vec<Variable> {
    vec![
        Variable {
            name: env_var_name(OPTION_SERIAL_PORT),
            kind: "string",
            default: "",
            required: true,
            description: "Name of the serial port device the ventilation bus is attached to",
        },
        Variable {
            name: env_var_name(OPTION_LOG_LEVEL),
            kind: "string",
            default: "info",
            required: false,
            description: "The log level (trace, debug, info, warn, error, off)",
        },
    ]
}

/// Load the configuration from the process environment.
///
/// # Errors
///
/// [`VentioError::MissingEnvVar`] for an unset required variable,
/// [`VentioError::UnknownEnvVar`] for an unrecognized variable carrying
/// the project prefix, or [`VentioError::InvalidEnvVar`] for a value that
/// does not parse.
pub fn load() -> Result<Config> {
    load_from(std::env::vars())
}

fn load_from(vars: impl IntoIterator<Item = (String, String)>) -> Result<Config> {
    let prefix = format!("{}_", sanitize_env_var_name(PREFIX));
    let values: HashMap<String, String> = vars
        .into_iter()
        .filter(|(name, _)| name.starts_with(&prefix))
        .collect();

    let known = variables();
    for name in values.keys() {
        if !known.iter().any(|variable| variable.name == *name) {
            return Err(VentioError::UnknownEnvVar(name.clone()));
        }
    }

    let serial_port_var = env_var_name(OPTION_SERIAL_PORT);
    let serial_port = values
        .get(&serial_port_var)
        .cloned()
        .ok_or(VentioError::MissingEnvVar(serial_port_var))?;

    let log_level_var = env_var_name(OPTION_LOG_LEVEL);
    let log_level = match values.get(&log_level_var) {
        Some(raw) => raw
            .parse::<LevelFilter>()
            .map_err(|err| VentioError::InvalidEnvVar {
                name: log_level_var,
                value: raw.clone(),
                reason: err.to_string(),
            })?,
        None => DEFAULT_LOG_LEVEL,
    };

    Ok(Config {
        serial_port,
        log_level,
    })
}

/// Environment variable name for an option: sanitized prefix, `_`,
/// sanitized option name.
pub fn env_var_name(option: &str) -> String {
    format!(
        "{}_{}",
        sanitize_env_var_name(PREFIX),
        sanitize_env_var_name(option)
    )
}

fn sanitize_env_var_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}
