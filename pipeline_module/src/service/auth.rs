use axum::http::HeaderMap;
use tracing::warn;

pub(super) const INBOUND_TOKEN_HEADER: &str = "x-inbound-token";

/// Authenticate the transport call with the shared webhook secret. An
/// unset secret leaves the endpoint open (local development); a configured
/// secret must match exactly.
pub(super) fn verify_inbound_token(
    headers: &HeaderMap,
    expected: Option<&str>,
) -> Result<(), &'static str> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = headers
        .get(INBOUND_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    match presented {
        Some(token) if token == expected => Ok(()),
        Some(_) => {
            warn!("inbound call presented a bad token");
            Err("bad_token")
        }
        None => Err("missing_token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(INBOUND_TOKEN_HEADER, HeaderValue::from_str(token).unwrap());
        }
        headers
    }

    #[test]
    fn open_when_no_secret_configured() {
        assert!(verify_inbound_token(&headers_with(None), None).is_ok());
        assert!(verify_inbound_token(&headers_with(Some("anything")), None).is_ok());
    }

    #[test]
    fn matching_token_passes() {
        assert!(verify_inbound_token(&headers_with(Some("s3cret")), Some("s3cret")).is_ok());
    }

    #[test]
    fn wrong_or_missing_token_is_rejected() {
        assert_eq!(
            verify_inbound_token(&headers_with(Some("nope")), Some("s3cret")),
            Err("bad_token")
        );
        assert_eq!(
            verify_inbound_token(&headers_with(None), Some("s3cret")),
            Err("missing_token")
        );
    }
}
