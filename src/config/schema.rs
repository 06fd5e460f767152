use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::GdConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub gd: GdConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
        }
    }
}

/// Where persistent stream sets are kept. `None` keeps them in memory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
    pub file: Option<FileLoggingConfigOverride>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = self.filter.as_ref() {
            target.filter = Some(filter.clone());
        }
        if let Some(file) = self.file.as_ref() {
            file.apply_to(&mut target.file);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileLoggingConfigOverride {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
    pub format: Option<LogFormat>,
    pub rotation: Option<LogRotation>,
}

impl FileLoggingConfigOverride {
    pub fn apply_to(&self, target: &mut FileLoggingConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(dir) = self.dir.as_ref() {
            target.dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            target.format = format;
        }
        if let Some(rotation) = self.rotation {
            target.rotation = rotation;
        }
    }
}

/// Protocol tunables a file may set; anything left out keeps the lower
/// layer's value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GdConfigOverride {
    pub ack_coalesce_ms: Option<u64>,
    pub request_forget_ms: Option<u64>,
    pub gap_curiosity_ms: Option<u64>,
    pub nack_repetition_ms: Option<u64>,
    pub max_nack_repetition_ms: Option<u64>,
    pub ack_expected_ms: Option<u64>,
    pub max_ack_expected_ms: Option<u64>,
    pub send_window: Option<u64>,
    pub ack_gap_for_silence_ticks: Option<u64>,
    pub repeated_value_percentage: Option<u64>,
    pub repeated_value_interval: Option<u64>,
    pub repeated_value_warning_ms: Option<u64>,
    pub blocked_renack_rounds: Option<u32>,
    pub flush_query_ms: Option<u64>,
}

macro_rules! apply_fields {
    ($from:expr, $to:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $from.$field {
                $to.$field = value;
            }
        )+
    };
}

impl GdConfigOverride {
    pub fn apply_to(&self, target: &mut GdConfig) {
        apply_fields!(
            self,
            target,
            ack_coalesce_ms,
            request_forget_ms,
            gap_curiosity_ms,
            nack_repetition_ms,
            max_nack_repetition_ms,
            ack_expected_ms,
            max_ack_expected_ms,
            send_window,
            ack_gap_for_silence_ticks,
            repeated_value_percentage,
            repeated_value_interval,
            repeated_value_warning_ms,
            blocked_renack_rounds,
            flush_query_ms,
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLayer {
    pub logging: LoggingConfigOverride,
    pub gd: GdConfigOverride,
    pub store: StoreConfig,
}

impl ConfigLayer {
    pub fn apply_to(&self, base: &mut Config) {
        self.logging.apply_to(&mut base.logging);
        self.gd.apply_to(&mut base.gd);
        if let Some(dir) = self.store.dir.as_ref() {
            base.store.dir = Some(dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_layer_keeps_other_fields() {
        let layer: ConfigLayer = toml::from_str(
            r#"
            [gd]
            send_window = 16

            [logging]
            stdout_format = "json"
            "#,
        )
        .unwrap();
        let mut config = Config::default();
        layer.apply_to(&mut config);
        assert_eq!(config.gd.send_window, 16);
        assert_eq!(config.gd.ack_expected_ms, GdConfig::default().ack_expected_ms);
        assert_eq!(config.logging.stdout_format, LogFormat::Json);
        assert!(config.logging.stdout);
        assert!(config.store.dir.is_none());
    }
}
