use std::env::var;

use exam_engine::GeneratorLimits;
use records::{FALLBACK_LOCALE, LOCALES};
use sentry::types::Dsn;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct EnvVars {
    pub environment: Environment,
    pub sentry_dsn: Option<String>,
    /// Overrides the interpreter step budget of dynamic questions.
    pub dynamic_max_operations: Option<u64>,
    pub default_locale: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "development" => Environment::Development,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            other => {
                warn!(
                    "ENVIRONMENT value '{}' is not valid. Defaulting to 'production'.",
                    other
                );
                Environment::Production
            }
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

impl EnvVars {
    pub fn new() -> Self {
        let environment = match var("ENVIRONMENT") {
            Ok(v) => v.into(),
            Err(_e) => {
                warn!("ENVIRONMENT not set. Defaulting to 'production'.");
                Environment::Production
            }
        };

        let sentry_dsn = match var("SENTRY_DSN") {
            Ok(dsn_string) => {
                assert!(
                    valid_sentry_dsn(&dsn_string),
                    "SENTRY_DSN is not valid DSN."
                );
                Some(dsn_string)
            }
            Err(_e) => None,
        };

        let dynamic_max_operations = match var("DYNAMIC_MAX_OPERATIONS") {
            Ok(val) => match val.parse::<u64>() {
                Ok(ops) if ops > 0 => Some(ops),
                Ok(_) => {
                    warn!("DYNAMIC_MAX_OPERATIONS provided but not > 0; ignoring");
                    None
                }
                Err(e) => {
                    warn!("Failed to parse DYNAMIC_MAX_OPERATIONS ('{val}'): {e}; ignoring");
                    None
                }
            },
            Err(_) => None,
        };

        let default_locale = match var("DEFAULT_LOCALE") {
            Ok(locale) if LOCALES.contains(&locale.as_str()) => locale,
            Ok(locale) => {
                warn!("DEFAULT_LOCALE '{locale}' is not supported. Defaulting to '{FALLBACK_LOCALE}'.");
                FALLBACK_LOCALE.to_string()
            }
            Err(_) => FALLBACK_LOCALE.to_string(),
        };

        Self {
            environment,
            sentry_dsn,
            dynamic_max_operations,
            default_locale,
        }
    }

    pub fn generator_limits(&self) -> GeneratorLimits {
        let defaults = GeneratorLimits::default();
        GeneratorLimits {
            max_operations: self.dynamic_max_operations.unwrap_or(defaults.max_operations),
            ..defaults
        }
    }
}

impl Default for EnvVars {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_sentry_dsn(url: &str) -> bool {
    url.parse::<Dsn>().is_ok()
}
