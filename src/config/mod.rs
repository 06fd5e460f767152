//! Config loading and persistence.

mod load;
mod merge;
mod schema;

pub use load::{
    ConfigError, config_path, load, load_from, load_layer, load_or_default, write_config,
};
pub use merge::{apply_env_overrides, apply_overrides_from, merge_layers};
pub use schema::{
    Config, ConfigLayer, FileLoggingConfig, FileLoggingConfigOverride, GdConfigOverride,
    LogFormat, LogRotation, LoggingConfig, LoggingConfigOverride, StoreConfig,
};
