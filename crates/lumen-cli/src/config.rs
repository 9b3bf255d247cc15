use lumen_core::{parse_bool_flag, Role};
use lumen_sync::ChannelConfig;
use std::io;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_RECONNECT_MS: u64 = 3_000;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub token: Option<String>,
    pub stream_enabled: bool,
    pub role: Role,
    pub reconnect_delay: Duration,
}

/// Flag values win over the environment.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub role: Option<Role>,
    pub no_stream: bool,
}

impl Config {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            enabled: self.stream_enabled,
            reconnect_delay: self.reconnect_delay,
            ..ChannelConfig::default()
        }
    }
}

pub fn load_config(overrides: &ConfigOverrides) -> Config {
    resolve_config(overrides, |key| std::env::var(key).ok())
}

fn resolve_config<F>(overrides: &ConfigOverrides, env: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    let api_url = overrides
        .api_url
        .clone()
        .or_else(|| non_blank("LUMEN_API_URL"))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let token = overrides.token.clone().or_else(|| non_blank("LUMEN_TOKEN"));
    let stream_enabled = !overrides.no_stream
        && non_blank("LUMEN_STREAM_ENABLED")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(true);
    let role = overrides.role.unwrap_or_else(|| {
        non_blank("LUMEN_ROLE")
            .and_then(|value| value.parse::<Role>().ok())
            .unwrap_or_default()
    });
    let reconnect_ms = non_blank("LUMEN_RECONNECT_MS")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_RECONNECT_MS);

    Config {
        api_url,
        token,
        stream_enabled,
        role,
        reconnect_delay: Duration::from_millis(reconnect_ms),
    }
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_enabled = std::env::var("LUMEN_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false);
    if stderr_enabled {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = resolve_config(&ConfigOverrides::default(), env_of(&[]));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.token.is_none());
        assert!(config.stream_enabled);
        assert_eq!(config.role, Role::Viewer);
        assert_eq!(config.reconnect_delay, Duration::from_millis(3_000));
    }

    #[test]
    fn env_values_are_parsed_and_bad_ones_ignored() {
        let config = resolve_config(
            &ConfigOverrides::default(),
            env_of(&[
                ("LUMEN_API_URL", "https://lights.example:9443"),
                ("LUMEN_TOKEN", "  "),
                ("LUMEN_STREAM_ENABLED", "off"),
                ("LUMEN_ROLE", "Admin"),
                ("LUMEN_RECONNECT_MS", "soon"),
            ]),
        );
        assert_eq!(config.api_url, "https://lights.example:9443");
        assert!(config.token.is_none());
        assert!(!config.stream_enabled);
        assert_eq!(config.role, Role::Admin);
        assert_eq!(config.reconnect_delay, Duration::from_millis(DEFAULT_RECONNECT_MS));
        assert!(!config.channel_config().enabled);
    }

    #[test]
    fn flags_override_env() {
        let overrides = ConfigOverrides {
            api_url: Some("http://10.0.0.2:8080".to_string()),
            token: Some("flag-token".to_string()),
            role: Some(Role::Operator),
            no_stream: true,
        };
        let config = resolve_config(
            &overrides,
            env_of(&[
                ("LUMEN_API_URL", "http://ignored"),
                ("LUMEN_TOKEN", "env-token"),
                ("LUMEN_STREAM_ENABLED", "1"),
                ("LUMEN_ROLE", "admin"),
                ("LUMEN_RECONNECT_MS", "750"),
            ]),
        );
        assert_eq!(config.api_url, "http://10.0.0.2:8080");
        assert_eq!(config.token.as_deref(), Some("flag-token"));
        assert!(!config.stream_enabled);
        assert_eq!(config.role, Role::Operator);
        assert_eq!(config.reconnect_delay, Duration::from_millis(750));
    }
}
