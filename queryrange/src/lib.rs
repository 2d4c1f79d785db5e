pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod http;
pub mod merge;
pub mod model;
pub mod request;
pub mod response;

pub use errors::FrontendError;
pub use merge::merge_responses;
pub use model::{ApiResponse, QueryRangeRequest, QueryRangeResponse, SampleStream};
pub use request::parse_request;
pub use response::parse_response;

use crate::context::RequestContext;
use crate::executor::Executor;
use crate::http::HttpDownstream;
use ::http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::{make_boxed_error_response, run_http_service};
use std::pin::Pin;
use std::sync::Arc;

pub async fn run(config: config::Config) -> Result<(), FrontendError> {
    config
        .validate()
        .map_err(|e| FrontendError::InternalError(format!("Invalid config: {e}")))?;

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        path = %config.path,
        downstream = %config.downstream.url,
        "Starting query frontend"
    );

    let service = QueryFrontendService::new(&config);
    run_http_service(&config.listener.host, config.listener.port, service).await
}

struct QueryFrontendService {
    path: Arc<str>,
    executor: Executor,
}

impl QueryFrontendService {
    fn new(config: &config::Config) -> Self {
        let downstream = HttpDownstream::new(
            config.downstream.url.clone(),
            config.timeouts.http_timeout_secs,
        );

        Self {
            path: Arc::from(config.path.as_str()),
            executor: Executor::new(Arc::new(downstream), config.merge),
        }
    }
}

impl Service<Request<Incoming>> for QueryFrontendService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = FrontendError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let rejection = if req.uri().path() != &*self.path {
            Some(StatusCode::NOT_FOUND)
        } else if req.method() != Method::GET {
            Some(StatusCode::METHOD_NOT_ALLOWED)
        } else {
            None
        };
        if let Some(status) = rejection {
            let response: Self::Response = make_boxed_error_response(status);
            return Box::pin(async move { Ok::<_, FrontendError>(response) });
        }

        // Range queries carry everything in the URI; the body is ignored.
        let (parts, _body) = req.into_parts();
        let request = Request::from_parts(parts, ());
        let ctx = RequestContext::from_headers(request.headers());
        let executor = self.executor.clone();

        Box::pin(async move {
            let response = executor.handle(&ctx, &request).await;
            let response: Self::Response =
                response.map(|body| Full::new(body).map_err(|e| match e {}).boxed());
            Ok::<_, FrontendError>(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Downstream, Listener, MergeConfig, Timeouts};
    use hyper::service::service_fn;
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use hyper_util::server::conn::auto::Builder;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const RESPONSE_BODY: &str = r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{"foo":"bar"},"values":[[1536673680,"137"],[1536673780,"137"]]}]}}"#;

    async fn backend_handler(
        _req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        Ok(Response::new(Full::new(Bytes::from_static(
            RESPONSE_BODY.as_bytes(),
        ))))
    }

    async fn start_backend() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let _ = Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service_fn(backend_handler))
                        .await;
                });
            }
        });

        port
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn get(port: u16, method: Method, path_and_query: &str) -> (StatusCode, Bytes) {
        let client: Client<HttpConnector, Full<Bytes>> =
            Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let request = Request::builder()
            .method(method)
            .uri(format!("http://127.0.0.1:{port}{path_and_query}"))
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = client.request(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    #[tokio::test]
    async fn test_service_end_to_end() {
        let backend_port = start_backend().await;
        let port = free_port().await;

        let config = config::Config {
            listener: Listener {
                host: "127.0.0.1".to_string(),
                port,
            },
            path: config::DEFAULT_PATH.to_string(),
            downstream: Downstream {
                url: url::Url::parse(&format!("http://127.0.0.1:{backend_port}")).unwrap(),
            },
            timeouts: Timeouts::default(),
            merge: MergeConfig::default(),
        };
        tokio::spawn(run(config));

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (status, body) = get(
            port,
            Method::GET,
            "/api/v1/query_range?start=1536673680&end=1536716898&step=120&query=up",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), RESPONSE_BODY.as_bytes());

        let (status, body) = get(port, Method::GET, "/api/v1/query_range?start=foo").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body.as_ref(),
            b"cannot parse \"foo\" to a valid timestamp\n"
        );

        let (status, _) = get(port, Method::GET, "/api/v1/query").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(port, Method::POST, "/api/v1/query_range").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let config = config::Config {
            listener: Listener {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            path: config::DEFAULT_PATH.to_string(),
            downstream: Downstream {
                url: url::Url::parse("http://127.0.0.1:9090").unwrap(),
            },
            timeouts: Timeouts::default(),
            merge: MergeConfig::default(),
        };

        assert!(matches!(
            run(config).await.unwrap_err(),
            FrontendError::InternalError(_)
        ));
    }
}
