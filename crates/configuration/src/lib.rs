use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

// Declare the modules that make up this crate.
pub mod error;

/// Where [`load`] reads variables from.
///
/// Variable names map to struct fields case-insensitively: `DATABASE_URL`
/// fills `database_url`. Use `#[serde(rename = "...")]` (lowercase) to map a
/// field to a differently named variable and `#[serde(default)]` to make it
/// optional.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    /// Only variables starting with `<PREFIX>_` are read, with the prefix removed.
    pub prefix: Option<String>,
    /// Splits variable names into nested keys, e.g. `"__"` maps
    /// `SERVER__PORT` to `server.port`.
    pub separator: Option<String>,
    /// Load `.env` into the process environment first. A missing file is fine.
    pub dotenv: bool,
    /// Read these variables instead of the process environment.
    pub vars: Option<HashMap<String, String>>,
}

impl EnvSource {
    /// The process environment, after loading `.env` if present.
    pub fn process() -> Self {
        Self {
            dotenv: true,
            ..Self::default()
        }
    }

    /// A fixed set of variables, ignoring the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            ..Self::default()
        }
    }
}

/// Loads `T` from the process environment (and `.env`, if present).
///
/// This is the primary entry point for this crate. It fails if a required
/// variable is absent or a value cannot be converted to its field's type.
pub fn load_from_env<T: DeserializeOwned>() -> Result<T, ConfigError> {
    load(&EnvSource::process())
}

/// Loads `T` from `source`.
pub fn load<T: DeserializeOwned>(source: &EnvSource) -> Result<T, ConfigError> {
    if source.dotenv {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file."),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    let mut environment = match &source.prefix {
        Some(prefix) => config::Environment::with_prefix(prefix).prefix_separator("_"),
        None => config::Environment::default(),
    };
    if let Some(separator) = &source.separator {
        environment = environment.separator(separator);
    }
    if let Some(vars) = &source.vars {
        environment = environment.source(Some(vars.clone().into_iter().collect()));
    }

    let builder = config::Config::builder().add_source(environment).build()?;

    // Attempt to deserialize the entire configuration into the caller's struct.
    let config = builder.try_deserialize::<T>()?;

    Ok(config)
}
