//! Runtime configuration for the VM and its compilation tiers.
//!
//! Settings come from a TOML document (all keys optional) and can then be
//! overridden from the environment:
//!
//! - `SWALLOW_JIT`: `0/false/off` disables compilation entirely, `all/always`
//!   compiles every code unit regardless of its per-function flag.
//! - `SWALLOW_OPT_LEVEL`: level used for code units left on auto.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::jit::OptLevel;

pub const ENV_JIT: &str = "SWALLOW_JIT";
pub const ENV_OPT_LEVEL: &str = "SWALLOW_OPT_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    /// Master switch. When off every call runs in the interpreter.
    pub enabled: bool,
    /// Treat every code unit as if its `use_jit` flag were set.
    pub compile_all: bool,
    /// Level an auto code unit resolves to on its first compiled dispatch.
    pub default_level: OptLevel,
    /// Requests above this level are clamped.
    pub max_level: OptLevel,
    pub recursion_limit: usize,
    /// Maximum number of artifacts kept by a cache created from this config.
    pub cache_capacity: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compile_all: false,
            default_level: OptLevel::default(),
            max_level: OptLevel::O3,
            recursion_limit: 400,
            cache_capacity: 4096,
        }
    }
}

impl JitConfig {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).context("invalid JIT configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&src).with_context(|| format!("in {}", path.display()))
    }

    /// Applies `SWALLOW_JIT` / `SWALLOW_OPT_LEVEL` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        let jit = std::env::var(ENV_JIT).ok();
        let level = std::env::var(ENV_OPT_LEVEL).ok();
        self.with_overrides(jit.as_deref(), level.as_deref())
    }

    pub fn with_overrides(mut self, jit: Option<&str>, level: Option<&str>) -> Result<Self> {
        if let Some(raw) = jit {
            let trimmed = raw.trim();
            if trimmed.eq_ignore_ascii_case("all") || trimmed.eq_ignore_ascii_case("always") {
                self.enabled = true;
                self.compile_all = true;
            } else {
                self.enabled = env_toggle_enabled(trimmed);
            }
        }
        if let Some(raw) = level {
            self.default_level = raw
                .parse::<OptLevel>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {ENV_OPT_LEVEL}"))?;
        }
        Ok(self)
    }

    /// Level actually compiled for a request, after clamping to `max_level`.
    pub fn clamp_level(&self, requested: OptLevel) -> OptLevel {
        requested.min(self.max_level)
    }
}

fn env_toggle_enabled(raw: &str) -> bool {
    if raw.is_empty() {
        return false;
    }
    !(raw.eq_ignore_ascii_case("0") || raw.eq_ignore_ascii_case("false") || raw.eq_ignore_ascii_case("off"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = JitConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(cfg, JitConfig::default());
    }

    #[test]
    fn parses_levels_as_integers() {
        let cfg = JitConfig::from_toml_str("default_level = 1\nmax_level = 2\nrecursion_limit = 50\n")
            .expect("config parses");
        assert_eq!(cfg.default_level, OptLevel::O1);
        assert_eq!(cfg.max_level, OptLevel::O2);
        assert_eq!(cfg.recursion_limit, 50);
        assert_eq!(cfg.clamp_level(OptLevel::O3), OptLevel::O2);
    }

    #[test]
    fn rejects_out_of_range_level_and_unknown_keys() {
        assert!(JitConfig::from_toml_str("default_level = 7").is_err());
        assert!(JitConfig::from_toml_str("turbo = true").is_err());
    }

    #[test]
    fn overrides_follow_env_conventions() {
        let cfg = JitConfig::default()
            .with_overrides(Some("off"), Some("O3"))
            .expect("overrides apply");
        assert!(!cfg.enabled);
        assert_eq!(cfg.default_level, OptLevel::O3);

        let cfg = JitConfig::default()
            .with_overrides(Some("always"), None)
            .expect("overrides apply");
        assert!(cfg.enabled && cfg.compile_all);

        assert!(JitConfig::default().with_overrides(None, Some("fast")).is_err());
    }

    #[test]
    fn load_names_the_file_on_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let good = dir.path().join("jit.toml");
        std::fs::write(&good, "compile_all = true\ncache_capacity = 8\n").expect("write config");
        let cfg = JitConfig::load(&good).expect("config loads");
        assert!(cfg.compile_all);
        assert_eq!(cfg.cache_capacity, 8);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "enabled = 3\n").expect("write config");
        let err = JitConfig::load(&bad).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
        assert!(JitConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
