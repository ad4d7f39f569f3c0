//! HTTP client for the hosted payment gateway: REST order creation with basic
//! auth and local HMAC-SHA256 verification of checkout signatures.

mod client;
mod signature;
mod types;

pub use client::HttpPaymentGateway;
pub use signature::SignatureVerifier;
