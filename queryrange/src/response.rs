//! Response codec for range-query results.
//!
//! Backend replies have the shape
//!
//! ```json
//! {
//!   "status": "success",
//!   "data": {
//!     "resultType": "matrix",
//!     "result": [{"metric": {"foo": "bar"}, "values": [[1536673680, "137"]]}]
//!   }
//! }
//! ```
//!
//! and error replies carry `errorType` and `error` instead of `data`. Decoding
//! canonicalizes at the boundary (sorted labels, millisecond timestamps);
//! encoding produces the same shape again so a merged answer is
//! indistinguishable from a single backend's.

use crate::context::RequestContext;
use crate::errors::ResponseError;
use crate::model::{ApiResponse, QueryRangeResponse, ResultType, Status};
use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use hyper::body::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct WireResponse {
    status: Status,
    #[serde(default)]
    data: Option<QueryRangeResponse>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Just enough of a reply to tell which result type it carries.
#[derive(Deserialize)]
struct WireEnvelope {
    status: Status,
    #[serde(default)]
    data: Option<WireDataEnvelope>,
}

#[derive(Deserialize)]
struct WireDataEnvelope {
    #[serde(rename = "resultType")]
    result_type: ResultType,
}

#[derive(Serialize)]
struct WireResponseRef<'a> {
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a QueryRangeResponse>,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    error_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Decodes a backend reply whose body has already been collected.
///
/// The response is consumed. Non-2xx replies are accepted only when their
/// body is an API error document; anything else becomes
/// [`ResponseError::Upstream`].
pub fn parse_response(
    ctx: &RequestContext,
    response: Response<Bytes>,
) -> Result<ApiResponse, ResponseError> {
    let (parts, body) = response.into_parts();

    if !parts.status.is_success() {
        if let Ok(decoded) = decode_body(&body)
            && decoded.is_error()
        {
            return Ok(decoded);
        }

        tracing::warn!(
            org_id = ?ctx.org_id,
            status = %parts.status,
            "Upstream returned a non-success status"
        );
        return Err(ResponseError::Upstream {
            status: parts.status,
            body: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }

    decode_body(&body).inspect_err(|e| {
        tracing::warn!(org_id = ?ctx.org_id, error = %e, "Failed to decode upstream response");
    })
}

/// Only matrix results are decoded. Every stream must have strictly
/// ascending millisecond timestamps once rounded.
fn decode_body(body: &Bytes) -> Result<ApiResponse, ResponseError> {
    let envelope: WireEnvelope = serde_json::from_slice(body)?;
    if envelope.status == Status::Success
        && let Some(data) = envelope.data
        && data.result_type != ResultType::Matrix
    {
        return Err(ResponseError::Decode(format!(
            "unsupported result type \"{}\", only matrix results can be decoded",
            data.result_type
        )));
    }

    let wire: WireResponse = serde_json::from_slice(body)?;

    match wire.status {
        Status::Success => {
            let data = wire.data.ok_or(ResponseError::MissingData)?;
            check_sample_order(&data)?;
            Ok(ApiResponse {
                status: Status::Success,
                data,
                error_type: wire.error_type,
                error: wire.error,
            })
        }
        Status::Error => Ok(ApiResponse {
            status: Status::Error,
            data: QueryRangeResponse::default(),
            error_type: wire.error_type,
            error: wire.error,
        }),
    }
}

fn check_sample_order(data: &QueryRangeResponse) -> Result<(), ResponseError> {
    for stream in &data.result {
        if let Some(pair) = stream
            .samples
            .windows(2)
            .find(|pair| pair[0].timestamp_ms >= pair[1].timestamp_ms)
        {
            return Err(ResponseError::Decode(format!(
                "samples of series {} are not strictly ascending at {}ms",
                stream.labels, pair[1].timestamp_ms
            )));
        }
    }
    Ok(())
}

impl ApiResponse {
    /// Encodes this result as a JSON HTTP response.
    ///
    /// Successful results are sent with 200. Error results omit `data` and
    /// use the status code conventionally paired with their `errorType`.
    pub fn to_http_response(&self) -> Result<Response<Bytes>, ResponseError> {
        let (status_code, wire) = match self.status {
            Status::Success => (
                StatusCode::OK,
                WireResponseRef {
                    status: self.status,
                    data: Some(&self.data),
                    error_type: self.error_type.as_deref(),
                    error: self.error.as_deref(),
                },
            ),
            Status::Error => (
                status_for_error_type(self.error_type.as_deref().unwrap_or_default()),
                WireResponseRef {
                    status: self.status,
                    data: None,
                    error_type: self.error_type.as_deref(),
                    error: self.error.as_deref(),
                },
            ),
        };

        let body = serde_json::to_vec(&wire)
            .map_err(|e| ResponseError::Serialization(e.to_string()))?;

        Response::builder()
            .status(status_code)
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))
            .map_err(|e| ResponseError::Serialization(e.to_string()))
    }
}

fn status_for_error_type(error_type: &str) -> StatusCode {
    match error_type {
        "bad_data" => StatusCode::BAD_REQUEST,
        "execution" => StatusCode::UNPROCESSABLE_ENTITY,
        "canceled" | "timeout" | "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
