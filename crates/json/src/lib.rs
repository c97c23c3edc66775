//! gcsio-json: Cloud Storage JSON API adapter
//!
//! Implements `gcsio_core::ObjectClient` over HTTPS. Only this crate knows
//! about URLs, headers and the wire format.

mod client;
mod wire;

pub use client::{ACCESS_TOKEN_ENV, JsonApiClient};
