use crate::model::ResultType;
use http::StatusCode;
use thiserror::Error;

/// Result type alias for query frontend operations
pub type Result<T, E = FrontendError> = std::result::Result<T, E>;

/// Rejections of an inbound range query. All of them are client errors.
///
/// `EndBeforeStart`, `NegativeOrZeroStep` and `StepTooSmall` are fixed
/// sentinels; match on the variant, not on the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("cannot parse \"{value}\" to a valid timestamp")]
    BadTimestamp { field: &'static str, value: String },

    #[error("cannot parse \"{value}\" to a valid duration")]
    BadDuration { field: &'static str, value: String },

    #[error("end timestamp must not be before start time")]
    EndBeforeStart,

    #[error("zero or negative query resolution step widths are not accepted. Try a positive integer")]
    NegativeOrZeroStep,

    #[error(
        "exceeded maximum resolution of 11,000 points per timeseries. Try decreasing the query resolution (?step=XX)"
    )]
    StepTooSmall,
}

/// Failures decoding a backend reply. These are never the client's fault.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("failed to decode response body: {0}")]
    Decode(String),

    #[error("response is missing the data section")]
    MissingData,

    #[error("upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("response serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ResponseError {
    fn from(e: serde_json::Error) -> Self {
        ResponseError::Decode(e.to_string())
    }
}

/// Partial results that cannot be combined. Indicates a bug upstream of the
/// merge; never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("cannot merge {found} result into {expected} result")]
    ResultTypeMismatch {
        expected: ResultType,
        found: ResultType,
    },

    #[error("samples of series {labels} are not in ascending timestamp order")]
    UnorderedSamples { labels: String },

    #[error("conflicting values for series {labels} at {timestamp_ms}ms")]
    ConflictingSamples { labels: String, timestamp_ms: i64 },
}

/// Errors that can occur while serving a range query
#[derive(Error, Debug)]
pub enum FrontendError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrontendError {
    /// Status code reported to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FrontendError::Request(_) => StatusCode::BAD_REQUEST,
            FrontendError::Response(ResponseError::Upstream { status, .. })
                if status.is_client_error() =>
            {
                *status
            }
            FrontendError::Response(_) | FrontendError::UpstreamRequestFailed(..) => {
                StatusCode::BAD_GATEWAY
            }
            FrontendError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FrontendError::ResponseBodyError(_) => StatusCode::BAD_GATEWAY,
            FrontendError::Merge(_) | FrontendError::InternalError(_) | FrontendError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
