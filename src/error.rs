use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("fix application error: {0}")]
    Application(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("language detection error: {0}")]
    Detect(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("publish error: {0}")]
    Publish(String),
}

pub type Result<T> = std::result::Result<T, Error>;
