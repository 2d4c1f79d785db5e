use crate::errors::FrontendError;
use crate::executor::Downstream;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::http::{add_via_header, filter_hop_by_hop};
use std::time::Duration;
use tokio::time::timeout;

/// Send a request to the backend with a timeout
///
/// The request path and query are resolved against `upstream_url`. Hop-by-hop
/// headers are stripped in both directions and a `Via` entry is added.
///
/// `timeout_secs` covers the whole round trip, including collecting the
/// response body.
pub async fn send_to_upstream<C, B>(
    client: &Client<C, B>,
    upstream_url: &url::Url,
    request: Request<B>,
    timeout_secs: u64,
) -> Result<Response<Bytes>, FrontendError>
where
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
    B: hyper::body::Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let upstream_identifier = upstream_url
        .host_str()
        .unwrap_or(upstream_url.as_str())
        .to_string();

    let Some(path_and_query) = request.uri().path_and_query() else {
        return Err(FrontendError::InternalError(
            "Request URI missing path and query".to_string(),
        ));
    };

    let mut url = upstream_url.clone();
    match path_and_query.as_str().split_once('?') {
        Some((path, query)) => {
            url.set_path(path);
            url.set_query(Some(query));
        }
        None => url.set_path(path_and_query.as_str()),
    }

    let (mut parts, body) = request.into_parts();
    filter_hop_by_hop(&mut parts.headers);
    add_via_header(&mut parts.headers, parts.version);

    let mut req_builder = Request::builder()
        .method(parts.method)
        .uri(url.as_str())
        .version(parts.version);
    for (name, value) in parts.headers.iter() {
        req_builder = req_builder.header(name, value);
    }

    let upstream_request = req_builder
        .body(body)
        .map_err(|e| FrontendError::InternalError(format!("Failed to build request: {e}")))?;

    let round_trip = async {
        let response = client.request(upstream_request).await.map_err(|e| {
            FrontendError::UpstreamRequestFailed(upstream_identifier.clone(), e.to_string())
        })?;

        let (mut parts, body) = response.into_parts();
        filter_hop_by_hop(&mut parts.headers);
        add_via_header(&mut parts.headers, parts.version);

        let body_bytes = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| FrontendError::ResponseBodyError(e.to_string()))?;

        Ok::<_, FrontendError>(Response::from_parts(parts, body_bytes))
    };

    timeout(Duration::from_secs(timeout_secs), round_trip)
        .await
        .map_err(|_| FrontendError::UpstreamTimeout(upstream_identifier.clone()))?
}

/// The backend reached over HTTP.
#[derive(Clone)]
pub struct HttpDownstream {
    client: Client<HttpConnector, Full<Bytes>>,
    url: url::Url,
    timeout_secs: u64,
}

impl HttpDownstream {
    pub fn new(url: url::Url, timeout_secs: u64) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            url,
            timeout_secs,
        }
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FrontendError> {
        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, Full::new(body));

        send_to_upstream(&self.client, &self.url, request, self.timeout_secs).await
    }
}
