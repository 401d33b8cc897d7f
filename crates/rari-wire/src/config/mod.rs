use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MAX_ROW_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Development => write!(f, "development"),
            Mode::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    pub mode: Mode,
    /// Largest single row the decoder accepts before failing the stream.
    pub max_row_bytes: usize,
    /// Buffered chunks per branch when a stream is tee'd for dual delivery.
    pub stream_channel_capacity: usize,
    /// CSP nonce stamped on injected payload scripts.
    pub inline_script_nonce: Option<String>,
    pub log_rows: bool,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Development,
            max_row_bytes: DEFAULT_MAX_ROW_BYTES,
            stream_channel_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
            inline_script_nonce: None,
            log_rows: false,
        }
    }
}

impl WireConfig {
    pub fn new(mode: Mode) -> Self {
        Self { mode, log_rows: mode == Mode::Development, ..Self::default() }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("RARI_WIRE_MODE") {
            Some(mode_str) => Self::new(mode_str.parse()?),
            None => Self::default(),
        };

        if let Some(max_row_str) = lookup("RARI_WIRE_MAX_ROW_BYTES") {
            config.max_row_bytes = max_row_str
                .parse()
                .map_err(|_| ConfigError::InvalidConfig("RARI_WIRE_MAX_ROW_BYTES".to_string()))?;
        }

        if let Some(capacity_str) = lookup("RARI_WIRE_STREAM_CHANNEL_CAPACITY") {
            config.stream_channel_capacity = capacity_str.parse().map_err(|_| {
                ConfigError::InvalidConfig("RARI_WIRE_STREAM_CHANNEL_CAPACITY".to_string())
            })?;
        }

        if let Some(nonce) = lookup("RARI_WIRE_SCRIPT_NONCE")
            && !nonce.is_empty()
        {
            config.inline_script_nonce = Some(nonce);
        }

        if let Some(log_rows) = lookup("RARI_WIRE_LOG_ROWS") {
            config.log_rows = log_rows.to_lowercase() == "true"
                || log_rows == "1"
                || log_rows.to_lowercase() == "yes";
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::FileRead)?;

        let config: Self = toml::from_str(&contents).map_err(ConfigError::TomlParse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(ConfigError::TomlSerialize)?;

        std::fs::write(path, contents).map_err(ConfigError::FileWrite)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_row_bytes == 0 {
            return Err(ConfigError::InvalidConfig("max_row_bytes cannot be 0".to_string()));
        }

        if self.stream_channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "stream_channel_capacity cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.mode == Mode::Development
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Invalid config value for {0}")]
    InvalidConfig(String),

    #[error("Failed to read config file: {0}")]
    FileRead(std::io::Error),

    #[error("Failed to write config file: {0}")]
    FileWrite(std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WireConfig::default();
        assert_eq!(config.mode, Mode::Development);
        assert_eq!(config.max_row_bytes, DEFAULT_MAX_ROW_BYTES);
        assert_eq!(config.stream_channel_capacity, DEFAULT_STREAM_CHANNEL_CAPACITY);
        assert!(config.inline_script_nonce.is_none());
    }

    #[test]
    fn test_production_mode_disables_row_logging() {
        let config = WireConfig::new(Mode::Production);
        assert!(!config.is_development());
        assert!(!config.log_rows);

        let config = WireConfig::new(Mode::Development);
        assert!(config.log_rows);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = WireConfig::from_lookup(lookup_from(&[
            ("RARI_WIRE_MODE", "prod"),
            ("RARI_WIRE_MAX_ROW_BYTES", "1024"),
            ("RARI_WIRE_STREAM_CHANNEL_CAPACITY", "8"),
            ("RARI_WIRE_SCRIPT_NONCE", "abc123"),
            ("RARI_WIRE_LOG_ROWS", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.mode, Mode::Production);
        assert_eq!(config.max_row_bytes, 1024);
        assert_eq!(config.stream_channel_capacity, 8);
        assert_eq!(config.inline_script_nonce.as_deref(), Some("abc123"));
        assert!(config.log_rows);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let result = WireConfig::from_lookup(lookup_from(&[("RARI_WIRE_MODE", "staging")]));
        assert!(matches!(result, Err(ConfigError::InvalidMode(_))));

        let result =
            WireConfig::from_lookup(lookup_from(&[("RARI_WIRE_MAX_ROW_BYTES", "lots")]));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));

        let result = WireConfig::from_lookup(lookup_from(&[("RARI_WIRE_MAX_ROW_BYTES", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.toml");

        let config = WireConfig {
            inline_script_nonce: Some("n0nce".to_string()),
            ..WireConfig::new(Mode::Production)
        };
        config.save_to_file(&path).unwrap();

        let loaded = WireConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.toml");
        std::fs::write(&path, "mode = \"production\"\n").unwrap();

        let loaded = WireConfig::from_file(&path).unwrap();
        assert_eq!(loaded.mode, Mode::Production);
        assert_eq!(loaded.max_row_bytes, DEFAULT_MAX_ROW_BYTES);
    }
}
