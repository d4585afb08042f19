//! Configuration loading
//!
//! Sources pass through environment expansion before they are parsed:
//! `${NAME}` substitutes a required variable, `${NAME:-fallback}` one
//! with a default. Every missing variable is reported in one error
//! rather than the first one found.

use crate::{Config, ConfigFormat};
use anima_core::{Error, Result};
use regex::{Captures, Regex};
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read config file {}: {e}", path.display())))?;

    load_from_str(&content, format)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    parse(&expand_env_vars(content)?, format)
}

/// Load and validate configuration; failures here prevent boot.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = load_from_file(path)?;

    crate::validator::validate_config(&config)?;

    Ok(config)
}

fn parse(content: &str, format: ConfigFormat) -> Result<Config> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("malformed YAML configuration: {e}"))),
        ConfigFormat::Toml => toml::from_str(content)
            .map_err(|e| Error::Config(format!("malformed TOML configuration: {e}"))),
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("malformed JSON configuration: {e}"))),
    }
}

/// Substitute `${NAME}` and `${NAME:-fallback}` references against the
/// process environment. Text that merely resembles a reference (no valid
/// variable name) is left untouched.
fn expand_env_vars(content: &str) -> Result<String> {
    let reference = Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::-(?P<fallback>[^}]*))?\}")
        .map_err(|e| Error::Config(format!("invalid expansion pattern: {e}")))?;

    let mut missing: Vec<String> = Vec::new();

    let expanded = reference.replace_all(content, |caps: &Captures<'_>| {
        let name = &caps["name"];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.name("fallback") {
                Some(fallback) => fallback.as_str().to_string(),
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            },
        }
    });

    if !missing.is_empty() {
        return Err(Error::Config(format!(
            "environment variables not set and without defaults: {}",
            missing.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
service:
  protocol: http
  address: "127.0.0.1:8080"
"#;

    #[test]
    fn test_load_yaml() {
        let config = load_from_str(BASE, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.service.address, "127.0.0.1:8080");
    }

    #[test]
    fn test_env_expansion_with_default() {
        let content = r#"
service:
  protocol: http
  address: "${ANIMA_TEST_UNSET_ADDR:-127.0.0.1:8099}"
"#;
        let config = load_from_str(content, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.service.address, "127.0.0.1:8099");
    }

    #[test]
    fn test_env_expansion_set_variable() {
        env::set_var("ANIMA_TEST_ADDR", "10.0.0.1:80");
        let content = r#"
service:
  protocol: http
  address: "${ANIMA_TEST_ADDR}"
"#;
        let config = load_from_str(content, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.service.address, "10.0.0.1:80");
    }

    #[test]
    fn test_env_expansion_reports_every_missing_variable() {
        let err = expand_env_vars("${ANIMA_TEST_NOPE_A} and ${ANIMA_TEST_NOPE_B}").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ANIMA_TEST_NOPE_A"), "{message}");
        assert!(message.contains("ANIMA_TEST_NOPE_B"), "{message}");
    }

    #[test]
    fn test_invalid_reference_is_left_alone() {
        // `1UP` is not a variable name; the text passes through verbatim.
        let expanded = expand_env_vars("cost: ${1UP}").unwrap();
        assert_eq!(expanded, "cost: ${1UP}");
    }

    #[test]
    fn test_load_toml() {
        let content = r#"
[service]
protocol = "tcp"
address = "127.0.0.1:9000"
"#;
        let config = load_from_str(content, ConfigFormat::Toml).unwrap();
        assert_eq!(config.service.address, "127.0.0.1:9000");
    }

    #[test]
    fn test_malformed_source_is_a_config_error() {
        let err = load_from_str("service: [not, a, mapping", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
