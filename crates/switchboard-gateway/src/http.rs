//! Shared HTTP client construction.

use std::time::Duration;

use reqwest::{Client, Method};

const DISABLE_SYSTEM_PROXY_ENV: &str = "SWITCHBOARD_DISABLE_SYSTEM_PROXY";

/// Default deadline applied to chat calls when the caller sets none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shorter deadline for catalog discovery handshakes.
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn build_http_client() -> Client {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));
    if should_disable_system_proxy() {
        builder = builder.no_proxy();
    }
    builder.build().expect("Failed to build reqwest client")
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}

/// Whether a method may be retried transparently at the transport level.
///
/// POST and PATCH are excluded; chat completions retry through their own
/// error-flag-driven loop instead.
pub fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET
        || *method == Method::HEAD
        || *method == Method::OPTIONS
        || *method == Method::PUT
        || *method == Method::DELETE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_methods() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::HEAD));
        assert!(is_idempotent(&Method::OPTIONS));
        assert!(is_idempotent(&Method::PUT));
        assert!(is_idempotent(&Method::DELETE));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }
}
