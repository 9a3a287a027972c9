//! Locator provider module
//!
//! Provides the provider trait consumed by the resolver and an HTTP client for it.

mod http;
mod provider;

pub use http::HttpProvider;
pub use provider::{LocatorProvider, PrimaryLocators, ProviderError, Reachability};
