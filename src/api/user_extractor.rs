use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use crate::model::UserContext;

/// Axum extractor for UserContext from request headers
///
/// - X-User-Id: user identifier, recorded as project owner and note author
/// - X-User-Name: optional display name
///
/// Without headers the development user is returned.
#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        match extract_header_value(headers, "x-user-id") {
            Some(user_id) => Ok(UserContext::new(
                user_id,
                extract_header_value(headers, "x-user-name"),
            )),
            None => Ok(UserContext::default()),
        }
    }
}

/// Extract a non-empty header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue, Request};

    #[tokio::test]
    async fn test_user_context_extraction() {
        let request = Request::builder()
            .header("x-user-id", "jdoe")
            .header("x-user-name", "Jane Doe")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let user = UserContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, "jdoe");
        assert_eq!(user.display_name(), "Jane Doe");
    }

    #[test]
    fn test_blank_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static("  "),
        );
        assert_eq!(extract_header_value(&headers, "x-user-id"), None);
        assert_eq!(extract_header_value(&headers, "x-user-name"), None);
    }
}
