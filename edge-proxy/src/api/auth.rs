use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use crate::api::errors::ProxyError;

/// Token from an `Authorization: Bearer <token>` header, if there is one.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}

/// Checks the request carries the configured bearer token. With no token configured
/// every request is refused.
pub fn authorize_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ProxyError> {
    if expected.is_empty() {
        return Err(ProxyError::Unauthorized(
            "change notifications are not enabled".to_string(),
        ));
    }
    match bearer_token(headers) {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ProxyError::Unauthorized("invalid token".to_string())),
        None => Err(ProxyError::Unauthorized(
            "missing bearer token".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_authorize_bearer() {
        assert!(authorize_bearer(&headers("Bearer secret"), "secret").is_ok());
        assert!(authorize_bearer(&headers("Bearer other"), "secret").is_err());
        assert!(authorize_bearer(&HeaderMap::new(), "secret").is_err());
    }

    #[test]
    fn test_empty_configured_token_rejects_everything() {
        assert!(matches!(
            authorize_bearer(&headers("Bearer "), ""),
            Err(ProxyError::Unauthorized(_))
        ));
        assert!(authorize_bearer(&headers("Bearer anything"), "").is_err());
    }
}
