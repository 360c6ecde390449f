use thiserror::Error;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

/// Runtime settings read from the environment. Command-line flags override
/// them in the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Only commands that touch report history need a database.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            database_url,
            max_connections: positive(&lookup, "REPORTS_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            history_limit: positive(&lookup, "REPORTS_HISTORY_LIMIT")?
                .unwrap_or(DEFAULT_HISTORY_LIMIT),
        })
    }
}

fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(Some(parsed)),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        assert_eq!(config(&[]).unwrap(), Config::default());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/college"),
            ("REPORTS_MAX_CONNECTIONS", "12"),
            ("REPORTS_HISTORY_LIMIT", " 20 "),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/college"));
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.history_limit, 20);
    }

    #[test]
    fn zero_or_garbage_is_rejected() {
        assert!(config(&[("REPORTS_HISTORY_LIMIT", "0")]).is_err());
        assert!(config(&[("REPORTS_MAX_CONNECTIONS", "many")]).is_err());
    }

    #[test]
    fn blank_database_url_counts_as_unset() {
        assert_eq!(config(&[("DATABASE_URL", "  ")]).unwrap().database_url, None);
    }
}
