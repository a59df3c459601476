#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Failed to parse indicator response: {0}")]
    Parse(String),
    #[error("No observations for indicator {0}")]
    NoData(String),
}
