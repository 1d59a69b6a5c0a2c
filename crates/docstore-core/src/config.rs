//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! Nested keys come from double underscores, so `APP_FEDERATION__POOL_SIZE`
//! sets `federation.pool_size`.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Like [`Config::get`], but an absent key yields `T::default()`.
    pub fn get_or_default<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.figment.contains(key) {
            self.get(key)
        } else {
            Ok(T::default())
        }
    }
}

/// Tunables for the federation layer, read from the `federation` section.
///
/// - `candidate_floor`: fewest candidates requested from any native call
/// - `max_window`: most candidates requested from any native call; deeper
///   pages are still served, cut from the capped candidate set
/// - `collection_timeout_ms`: per-collection deadline
/// - `pool_size`: concurrent sessions per backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub candidate_floor: usize,
    pub max_window: usize,
    pub collection_timeout_ms: u64,
    pub pool_size: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self { candidate_floor: 64, max_window: 10_000, collection_timeout_ms: 5_000, pool_size: 8 }
    }
}

impl FederationConfig {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let federation: Self = config.get_or_default("federation")?;
        federation.validate()?;
        Ok(federation)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(name) = self.zero_fields().first() {
            anyhow::bail!("Invalid configuration: federation.{} must be greater than zero", name);
        }
        Ok(())
    }

    /// Replace every zero-valued field with its default.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let zero = self.zero_fields();
        if zero.is_empty() {
            return self;
        }
        tracing::warn!(fields = ?zero, "federation settings must be greater than zero, using defaults");
        let defaults = Self::default();
        Self {
            candidate_floor: if self.candidate_floor == 0 { defaults.candidate_floor } else { self.candidate_floor },
            max_window: if self.max_window == 0 { defaults.max_window } else { self.max_window },
            collection_timeout_ms: if self.collection_timeout_ms == 0 {
                defaults.collection_timeout_ms
            } else {
                self.collection_timeout_ms
            },
            pool_size: if self.pool_size == 0 { defaults.pool_size } else { self.pool_size },
        }
    }

    fn zero_fields(&self) -> Vec<&'static str> {
        [
            ("candidate_floor", self.candidate_floor == 0),
            ("max_window", self.max_window == 0),
            ("collection_timeout_ms", self.collection_timeout_ms == 0),
            ("pool_size", self.pool_size == 0),
        ]
        .into_iter()
        .filter_map(|(name, zero)| zero.then_some(name))
        .collect()
    }

    pub fn collection_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_timeout_ms)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
