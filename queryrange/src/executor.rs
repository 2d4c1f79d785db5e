use crate::config::MergeConfig;
use crate::context::RequestContext;
use crate::errors::FrontendError;
use crate::merge::merge_responses;
use crate::model::{ApiResponse, QueryRangeRequest};
use crate::request::parse_request;
use crate::response::parse_response;
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Request, Response};
use shared::http::make_error_response_with_message;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Something that can answer a single range query request.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FrontendError>;
}

#[derive(Clone)]
pub struct Executor {
    downstream: Arc<dyn Downstream>,
    merge: MergeConfig,
}

impl Executor {
    pub fn new(downstream: Arc<dyn Downstream>, merge: MergeConfig) -> Self {
        Self { downstream, merge }
    }

    /// Serves one inbound range query end to end. Never fails: every error is
    /// turned into a plain-text response carrying the matching status code.
    pub async fn handle<B>(&self, ctx: &RequestContext, request: &Request<B>) -> Response<Bytes> {
        let result = async {
            let query = parse_request(request)?;
            let merged = self.execute(ctx, vec![query]).await?;
            Ok::<_, FrontendError>(merged.to_http_response()?)
        }
        .await;

        result.unwrap_or_else(|e| {
            tracing::debug!(org_id = ?ctx.org_id, error = %e, "Range query failed");
            make_error_response_with_message(e.status_code(), &e.to_string())
        })
    }

    /// Sends every request downstream in parallel and merges the decoded
    /// results in request order.
    ///
    /// The first transport or decode failure aborts the remaining requests.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        requests: Vec<QueryRangeRequest>,
    ) -> Result<ApiResponse, FrontendError> {
        let mut join_set = JoinSet::new();
        let total = requests.len();

        for (index, query) in requests.into_iter().enumerate() {
            let downstream = self.downstream.clone();
            let ctx = ctx.clone();

            join_set.spawn(async move {
                let result = async {
                    let request = query.to_http_request(&ctx)?;
                    let response = downstream.round_trip(request).await?;
                    Ok::<_, FrontendError>(parse_response(&ctx, response)?)
                }
                .await;
                (index, result)
            });
        }

        let mut results: Vec<Option<ApiResponse>> = vec![None; total];

        while let Some(join_result) = join_set.join_next().await {
            match join_result {
                Ok((index, Ok(response))) => results[index] = Some(response),
                Ok((index, Err(e))) => {
                    tracing::warn!(org_id = ?ctx.org_id, index, error = %e, "Downstream request failed");
                    join_set.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("Task panicked: {}", e);
                    join_set.abort_all();
                    return Err(FrontendError::InternalError(format!(
                        "Downstream task failed: {e}"
                    )));
                }
            }
        }

        let responses = results
            .into_iter()
            .map(|response| {
                response.ok_or_else(|| {
                    FrontendError::InternalError("Missing downstream response".to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(merge_responses(&responses, &self.merge)?)
    }
}
