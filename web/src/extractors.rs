//! Custom Axum extractors for the wallet request contract.
//!
//! - [`IdempotencyKey`]: the mandatory `x-idempotency-key` header on every
//!   mutating endpoint; a missing header is a 400 whose message names the
//!   header, so clients can fix the call without reading docs.
//! - [`JsonBody`]: strict JSON body extraction — malformed JSON and unknown
//!   fields are both 400, not Axum's default 422.

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

/// Header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Idempotency key extractor.
///
/// Keys are opaque client strings; the namespace is global across
/// endpoints, so the same key on `/deposit` and `/withdraw` addresses the
/// same idempotency record.
///
/// # Example
///
/// ```ignore
/// async fn deposit(
///     State(state): State<AppState>,
///     IdempotencyKey(key): IdempotencyKey,
///     JsonBody(request): JsonBody<DepositRequest>,
/// ) -> Result<Response, AppError> { /* … */ }
/// ```
#[derive(Debug, Clone)]
pub struct IdempotencyKey(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .ok_or_else(|| {
                AppError::bad_request(format!("Missing {IDEMPOTENCY_KEY_HEADER} header"))
            })?
            .to_str()
            .map_err(|_| {
                AppError::bad_request(format!("Invalid {IDEMPOTENCY_KEY_HEADER} header value"))
            })?
            .to_string();

        if key.is_empty() {
            return Err(AppError::bad_request(format!(
                "Empty {IDEMPOTENCY_KEY_HEADER} header"
            )));
        }

        Ok(Self(key))
    }
}

/// Strict JSON body extractor.
///
/// Deserializes with the target type's own serde attributes, so a DTO with
/// `#[serde(deny_unknown_fields)]` rejects surplus fields. Every failure —
/// wrong content, syntax error, unknown field, bad value — is a 400.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request(format!("Failed to read request body: {e}")))?;

        let value = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::bad_request(format!("Invalid request body: {e}")))?;

        Ok(Self(value))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase", deny_unknown_fields)]
    struct TestRequest {
        wallet_id: String,
        amount: f64,
    }

    #[tokio::test]
    async fn idempotency_key_extracted() {
        let req = Request::builder()
            .header(IDEMPOTENCY_KEY_HEADER, "key-1")
            .body(())
            .unwrap();

        let (mut parts, ()) = req.into_parts();
        let key = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(key.0, "key-1");
    }

    #[tokio::test]
    async fn missing_key_names_the_header() {
        let req = Request::builder().body(()).unwrap();
        let (mut parts, ()) = req.into_parts();

        let err = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("x-idempotency-key"));
    }

    #[tokio::test]
    async fn json_body_parses_valid_request() {
        let req = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"walletId":"w1","amount":100}"#))
            .unwrap();

        let JsonBody(body) = JsonBody::<TestRequest>::from_request(req, &())
            .await
            .unwrap();
        assert_eq!(body.wallet_id, "w1");
        assert!((body.amount - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn json_body_rejects_unknown_fields_with_400() {
        let req = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(
                r#"{"walletId":"w1","amount":100,"extra":true}"#,
            ))
            .unwrap();

        let err = JsonBody::<TestRequest>::from_request(req, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn json_body_rejects_malformed_json_with_400() {
        let req = Request::builder()
            .method("POST")
            .body(axum::body::Body::from("{not json"))
            .unwrap();

        let err = JsonBody::<TestRequest>::from_request(req, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
