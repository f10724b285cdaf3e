use docmap_document::OdmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Odm(#[from] OdmError),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SdkError {
    /// The document-layer error behind this one, if any.
    pub fn as_odm(&self) -> Option<&OdmError> {
        match self {
            Self::Odm(e) => Some(e),
            _ => None,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
