use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::{Effect, Transience};

use super::merge::{apply_env_overrides, merge_layers};
use super::{Config, ConfigLayer};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no config directory on this platform")]
    NoConfigDir,
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Read { .. } | ConfigError::Write { .. } => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ConfigError::Write { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}

/// `$GD_CONFIG`, else `<config dir>/gd/gd.toml`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os("GD_CONFIG").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("gd").join("gd.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Parse one layer. A missing file is an empty layer.
pub fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Defaults, the user file, then the environment.
pub fn load() -> Result<Config, ConfigError> {
    let path = config_path()?;
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let mut config = merge_layers(load_layer(path)?);
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Like [`load`], but falls back to defaults (plus environment) on error.
pub fn load_or_default() -> Config {
    match load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("config load failed, using defaults: {err}");
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            config
        }
    }
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let contents = toml::to_string_pretty(cfg)?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    fs::write(temp.path(), data).map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{LogFormat, LogRotation};

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gd.toml");
        let mut cfg = Config::default();
        cfg.gd.send_window = 12;
        cfg.gd.ack_coalesce_ms = 0;
        cfg.logging.stdout = false;
        cfg.logging.file.enabled = true;
        cfg.logging.file.format = LogFormat::Pretty;
        cfg.logging.file.rotation = LogRotation::Hourly;
        cfg.store.dir = Some(dir.path().join("sets"));

        write_config(&path, &cfg).unwrap();
        let loaded: Config = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_file_is_an_empty_layer() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_layer(&dir.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gd.toml");
        fs::write(&path, "[gd]\nsend_window = \"lots\"\n").unwrap();
        let err = load_layer(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("gd.toml"));
        assert_eq!(err.transience(), Transience::Permanent);
    }
}
