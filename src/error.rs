use thiserror::Error as ThisError;

/// Failure of a single upstream call. Callers in the enrichment path treat
/// every variant as "this attempt failed" and degrade to null fields.
#[derive(ThisError, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("missing API key for {0}")]
    MissingKey(&'static str),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

impl FetchError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
