//! RajaOngkir (Komerce) API client library.
//!
//! Provides rate-limited access to the destination hierarchy, destination
//! search, and domestic shipping-cost endpoints.

pub mod api;
pub mod cost;
pub mod rate_limit;
pub mod rest;

pub use api::LocationApi;
pub use rate_limit::RateLimiter;
pub use rest::RajaOngkirClient;
