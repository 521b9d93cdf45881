use std::path::Path;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};

use crate::config::EngineConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads engine configuration by merging defaults, TOML, environment
    /// variables, and JSON.
    ///
    /// Environment variables use the `ANCHOR_` prefix with `__` as the
    /// section separator, e.g. `ANCHOR_DATABASE__URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<EngineConfig> {
        Self::load_from("config/Engine.toml")
    }

    /// Loads engine configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ANCHOR_").split("__"))
            .join(Json::file(path.with_extension("json")))
            .extract()?;

        Ok(config)
    }
}
