// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of workspace-local config file candidates, lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(".parley/config.yaml"),
        PathBuf::from(".parley/config.yml"),
        PathBuf::from(".parley.yaml"),
        PathBuf::from(".parley.yml"),
        PathBuf::from("parley.yaml"),
        PathBuf::from("parley.yml"),
    ]
}

/// Parse a configuration from YAML text.  Unknown keys are ignored.
pub fn from_yaml(text: &str) -> anyhow::Result<Config> {
    serde_yaml::from_str(text).context("parsing config YAML")
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn from_yaml_overrides_defaults() {
        let cfg = from_yaml("conversation:\n  silence_threshold: 0.6").unwrap();
        assert_eq!(cfg.conversation.silence_threshold, 0.6);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.conversation.max_context_tokens, 100_000);
    }

    #[test]
    fn from_yaml_ignores_unknown_keys() {
        let cfg = from_yaml("conversation:\n  silence_threshold: 0.4\nfuture_section:\n  x: 1");
        assert!(cfg.is_ok());
        assert_eq!(cfg.unwrap().conversation.silence_threshold, 0.4);
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/parley_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "tools:\n  max_tool_iterations: 3").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.tools.max_tool_iterations, 3);
    }
}
