//! Upstream API access layer: request signing, paced and retried HTTP,
//! risk-control escalation, and the typed facade over upstream endpoints.
//!
//! Everything funnels through one [`RateLimitedClient`] instance so that
//! concurrent subscriptions queue behind a single pacing point instead of
//! bursting requests at the upstream.

pub mod client;
pub mod error;
pub mod http;
pub mod risk;
pub mod sign;
pub mod types;

pub use client::UpstreamClient;
pub use error::ApiError;
pub use http::{HttpConfig, RateLimitedClient};
pub use risk::{RiskConfig, RiskTracker};
pub use sign::Signer;
