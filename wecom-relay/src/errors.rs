use crate::config::ValidationError;
use crate::token::CacheError;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("token cache unavailable: {0}")]
    Cache(#[from] CacheError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
