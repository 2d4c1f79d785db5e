use http::HeaderMap;
use http::header::HeaderName;

/// Header carrying the tenant the request is made on behalf of.
pub const ORG_ID_HEADER: HeaderName = HeaderName::from_static("x-scope-orgid");

/// Request-scoped values handed to the codecs by the surrounding service.
///
/// The organization id is passed through to downstream requests untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub org_id: Option<String>,
}

impl RequestContext {
    pub fn with_org_id(org_id: impl Into<String>) -> Self {
        Self {
            org_id: Some(org_id.into()),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let org_id = headers
            .get(&ORG_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Self { org_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(RequestContext::from_headers(&headers), RequestContext::default());

        headers.insert("X-Scope-OrgID", HeaderValue::from_static("tenant-1"));
        assert_eq!(
            RequestContext::from_headers(&headers),
            RequestContext::with_org_id("tenant-1")
        );
    }
}
