use crate::{
    metrics::{DEFAULT_METRICS_CAPACITY, MAX_METRICS_CAPACITY},
    FireError, Result,
};

/// Configures the dispatcher's metrics buffering, concurrency and identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispatcherOptions {
    /// Events buffered per metrics observer before the oldest are dropped.
    pub metrics_capacity: usize,
    /// Maximum number of dispatches running attempts at once (`None` = unbounded).
    pub max_concurrent_dispatches: Option<usize>,
    /// `User-Agent` sent with every attempt unless the request sets its own.
    pub user_agent: String,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            metrics_capacity: DEFAULT_METRICS_CAPACITY,
            max_concurrent_dispatches: None,
            user_agent: concat!("httpfire/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl DispatcherOptions {
    /// Reads options from the environment, keeping defaults for unset variables.
    ///
    /// Reads:
    /// - `HTTPFIRE_METRICS_CAPACITY`: per-observer event buffer
    /// - `HTTPFIRE_MAX_CONCURRENCY`: concurrent dispatch cap
    /// - `HTTPFIRE_USER_AGENT`: default `User-Agent`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(value) = lookup("HTTPFIRE_METRICS_CAPACITY") {
            options.metrics_capacity = parse_count("HTTPFIRE_METRICS_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("HTTPFIRE_MAX_CONCURRENCY") {
            options.max_concurrent_dispatches =
                Some(parse_count("HTTPFIRE_MAX_CONCURRENCY", &value)?);
        }
        if let Some(value) = lookup("HTTPFIRE_USER_AGENT") {
            if !value.trim().is_empty() {
                options.user_agent = value.trim().to_owned();
            }
        }
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics_capacity == 0 {
            return Err(FireError::InvalidOptions(
                "metrics capacity must be greater than 0".to_owned(),
            ));
        }
        if self.metrics_capacity > MAX_METRICS_CAPACITY {
            return Err(FireError::InvalidOptions(format!(
                "metrics capacity cannot be greater than {MAX_METRICS_CAPACITY}"
            )));
        }
        if self.max_concurrent_dispatches == Some(0) {
            return Err(FireError::InvalidOptions(
                "max concurrent dispatches must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| FireError::InvalidOptions(format!("{key}='{value}' is not a count: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::DispatcherOptions;
    use crate::FireError;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let options = DispatcherOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(options, DispatcherOptions::default());
        assert!(options.user_agent.starts_with("httpfire/"));
    }

    #[test]
    fn reads_all_variables() {
        let options = DispatcherOptions::from_lookup(lookup(&[
            ("HTTPFIRE_METRICS_CAPACITY", "64"),
            ("HTTPFIRE_MAX_CONCURRENCY", " 8 "),
            ("HTTPFIRE_USER_AGENT", "the-awesome-agent/007"),
        ]))
        .unwrap();

        assert_eq!(options.metrics_capacity, 64);
        assert_eq!(options.max_concurrent_dispatches, Some(8));
        assert_eq!(options.user_agent, "the-awesome-agent/007");
    }

    #[test]
    fn rejects_garbage_and_zero() {
        assert!(matches!(
            DispatcherOptions::from_lookup(lookup(&[("HTTPFIRE_MAX_CONCURRENCY", "many")])),
            Err(FireError::InvalidOptions(_))
        ));
        assert!(matches!(
            DispatcherOptions::from_lookup(lookup(&[("HTTPFIRE_METRICS_CAPACITY", "0")])),
            Err(FireError::InvalidOptions(_))
        ));
        assert!(matches!(
            DispatcherOptions::from_lookup(lookup(&[(
                "HTTPFIRE_METRICS_CAPACITY",
                "18446744073709551615"
            )])),
            Err(FireError::InvalidOptions(_))
        ));

        let oversized = DispatcherOptions {
            metrics_capacity: usize::MAX,
            ..DispatcherOptions::default()
        };
        assert!(matches!(
            oversized.validate(),
            Err(FireError::InvalidOptions(_))
        ));
    }
}
