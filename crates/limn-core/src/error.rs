use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The upstream graph holds no data for the requested identifier.
    /// Normal condition, distinct from a transport failure.
    #[error("No data for identifier: {0}")]
    NotFound(String),

    #[error("Upstream returned status {status} for {endpoint}")]
    Upstream { endpoint: String, status: u16 },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("RDF parse error: {0}")]
    Rdf(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
