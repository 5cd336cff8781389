/// Shared error type used across all cobot crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("plugin '{0}' is already registered")]
    DuplicateId(String),

    #[error("plugin '{plugin}' depends on '{missing}' which is not registered")]
    Dependency { plugin: String, missing: String },

    #[error("communication: {0}")]
    Communication(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a provider error with the given provider id.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
