use std::str::FromStr;

use super::{Config, ConfigLayer};

/// Defaults, then each layer in order; later layers win.
pub fn merge_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Config {
    let mut config = Config::default();
    for layer in layers {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply `GD_*` overrides read through `lookup`. Unparseable values are
/// logged and skipped.
pub fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(value) = parse_var(&lookup, "GD_ACK_COALESCE_MS") {
        config.gd.ack_coalesce_ms = value;
    }
    if let Some(value) = parse_var(&lookup, "GD_SEND_WINDOW") {
        config.gd.send_window = value;
    }
    if let Some(value) = parse_var(&lookup, "GD_REQUEST_FORGET_MS") {
        config.gd.request_forget_ms = value;
    }
    if let Some(raw) = lookup("GD_STORE_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.store.dir = Some(trimmed.into());
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("invalid {key}, ignoring: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use crate::config::GdConfigOverride;
    use crate::core::GdConfig;

    #[test]
    fn merge_layers_respects_precedence() {
        let user = ConfigLayer {
            gd: GdConfigOverride {
                send_window: Some(8),
                gap_curiosity_ms: Some(50),
                ..GdConfigOverride::default()
            },
            ..ConfigLayer::default()
        };
        let cli = ConfigLayer {
            gd: GdConfigOverride {
                send_window: Some(32),
                ..GdConfigOverride::default()
            },
            ..ConfigLayer::default()
        };

        let config = merge_layers([user, cli]);
        assert_eq!(config.gd.send_window, 32);
        assert_eq!(config.gd.gap_curiosity_ms, 50);
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GD_ACK_COALESCE_MS", "0"),
            ("GD_SEND_WINDOW", "not-a-number"),
            ("GD_REQUEST_FORGET_MS", " 750 "),
            ("GD_STORE_DIR", "/tmp/gd-store"),
        ]);

        let mut config = Config::default();
        apply_overrides_from(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.gd.ack_coalesce_ms, 0);
        assert_eq!(config.gd.send_window, GdConfig::default().send_window);
        assert_eq!(config.gd.request_forget_ms, 750);
        assert_eq!(
            config.store.dir.as_deref(),
            Some(std::path::Path::new("/tmp/gd-store"))
        );
    }
}
