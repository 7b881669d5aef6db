//! Axum integration layer for the wallet service.
//!
//! This crate keeps the HTTP edge thin: errors that know how to render
//! themselves, extractors for the request contract (idempotency key header,
//! strictly validated JSON bodies) and a correlation-id middleware. The
//! domain lives behind it — handlers translate between HTTP and the command
//! mediator and nothing else.
//!
//! # Request Flow
//!
//! 1. HTTP request arrives at an Axum handler
//! 2. Extractors pull the idempotency key and validate the JSON body
//! 3. The handler dispatches to the command mediator / read models
//! 4. The result (or [`AppError`]) is rendered as a JSON response

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod middleware;

pub use error::AppError;
pub use extractors::{IdempotencyKey, JsonBody, IDEMPOTENCY_KEY_HEADER};
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
