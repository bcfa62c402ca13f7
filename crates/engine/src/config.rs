use std::time::Duration;

/// Default debounce window between the last structural edit and a save.
pub const DEFAULT_DEBOUNCE_MS: u64 = 800;

/// Default broadcast capacity of the session's event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default timeout applied by the HTTP gateway.
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Sub-document fields protected by the hydration guard unless overridden.
pub const DEFAULT_GUARDED_FIELDS: &[&str] = &["packages"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Sync session configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub debounce: Duration,
    /// `config` fields compared as sets during hydration.
    pub guarded_fields: Vec<String>,
    pub event_capacity: usize,
    /// Request timeout for gateways that honour one.
    pub gateway_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            guarded_fields: DEFAULT_GUARDED_FIELDS.iter().map(|f| f.to_string()).collect(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default    |
    /// |----------------------------------|------------|
    /// | `GRAPHSYNC_DEBOUNCE_MS`          | `800`      |
    /// | `GRAPHSYNC_GUARDED_FIELDS`       | `packages` |
    /// | `GRAPHSYNC_EVENT_CAPACITY`       | `256`      |
    /// | `GRAPHSYNC_GATEWAY_TIMEOUT_SECS` | `30`       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let debounce = match lookup("GRAPHSYNC_DEBOUNCE_MS") {
            Some(value) => Duration::from_millis(parse(&value, "GRAPHSYNC_DEBOUNCE_MS", "a number of milliseconds")?),
            None => defaults.debounce,
        };

        // An explicitly empty list disables the guard.
        let guarded_fields = match lookup("GRAPHSYNC_GUARDED_FIELDS") {
            Some(value) => value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.guarded_fields,
        };

        let event_capacity = match lookup("GRAPHSYNC_EVENT_CAPACITY") {
            Some(value) => {
                let capacity: usize = parse(&value, "GRAPHSYNC_EVENT_CAPACITY", "a positive integer")?;
                if capacity == 0 {
                    return Err(ConfigError::Invalid {
                        var: "GRAPHSYNC_EVENT_CAPACITY",
                        value,
                        expected: "a positive integer",
                    });
                }
                capacity
            }
            None => defaults.event_capacity,
        };

        let gateway_timeout = match lookup("GRAPHSYNC_GATEWAY_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse(&value, "GRAPHSYNC_GATEWAY_TIMEOUT_SECS", "a number of seconds")?),
            None => defaults.gateway_timeout,
        };

        Ok(Self {
            debounce,
            guarded_fields,
            event_capacity,
            gateway_timeout,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_guarded_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guarded_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

fn parse<T: std::str::FromStr>(value: &str, var: &'static str, expected: &'static str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected,
    })
}
