//! Configuration loading helpers.
//!
//! Component configs (risk limits, simulator settings) are plain serde structs.
//! They are populated either from individual environment variables via
//! [`env_or`] or from a config file layered under prefixed environment
//! overrides via [`load_file`].

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::env;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Load a `.env` file from the working directory if one exists.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "Loaded environment file");
    }
}

/// Read `key` from the environment and parse it, falling back to `default`
/// when the variable is unset or empty.
///
/// A variable that is set but cannot be parsed is a configuration error rather
/// than a silent fallback.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| Error::Config {
            message: format!("{key}={raw:?} is not valid: {e}"),
        }),
        _ => Ok(default),
    }
}

/// Deserialize a config struct from `path`, with `PREFIX__FIELD` environment
/// variables taking precedence over values in the file.
///
/// The file format is inferred from the extension (TOML, JSON, YAML, ...).
pub fn load_file<T: DeserializeOwned>(path: impl AsRef<Path>, env_prefix: &str) -> Result<T> {
    let path = path.as_ref();
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    debug!(path = %path.display(), prefix = env_prefix, "Loaded configuration file");
    Ok(settings.try_deserialize()?)
}
