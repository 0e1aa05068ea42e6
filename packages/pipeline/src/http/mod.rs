//! Token-rotating HTTP client (spec §4.1.3), ported from
//! `talos.api.requests.Requests`.
//!
//! `reqwest` replaces the `requests` library directly; the bearer
//! token is scraped from a homepage HTML response the same way, via a
//! regex over the `accessToken` field embedded in Reddit's page
//! bundle, and is refreshed every `requests_per_token` authorized
//! requests.

mod client;

pub use client::{HttpResponse, RequestMethod, TokenRotatingClient};
