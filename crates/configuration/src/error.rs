use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from the environment: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Failed to read the .env file: {0}")]
    DotenvError(#[from] dotenvy::Error),
}
