//! # Data Retrieval Module
//!
//! Generic HTTP retrieval for the event sources. Request building, retries and
//! JSON decoding live here so that a source only deals with its own payload
//! shape.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: An `ApiClient` built on `reqwest` and `reqwest-middleware`,
//!   with automatic retries (exponential backoff) and a per-request timeout.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
