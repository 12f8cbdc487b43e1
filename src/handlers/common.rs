use axum::http::HeaderMap;

use crate::errors::ServiceError;

/// Header carrying the shopper's opaque session token
pub const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// Pulls the session token out of the request headers
pub fn session_token(headers: &HeaderMap) -> Result<String, ServiceError> {
    headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ServiceError::InvalidInput(format!("{} header is required", SESSION_TOKEN_HEADER))
        })
}

/// Best-effort client address for provider audit fields
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("127.0.0.1")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_token_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("  tok-1  "));
        assert_eq!(session_token(&headers).unwrap(), "tok-1");
    }

    #[test]
    fn a_missing_or_blank_token_is_rejected() {
        assert!(session_token(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("   "));
        assert!(session_token(&headers).is_err());
    }

    #[test]
    fn client_ip_takes_the_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
        assert_eq!(client_ip(&HeaderMap::new()), "127.0.0.1");
    }
}
