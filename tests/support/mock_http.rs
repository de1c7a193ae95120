//! Local HTTP backends for adapter and CLI tests.

use std::net::TcpListener;

use wiremock::MockServer;

/// When set to `1`, a host without loopback networking fails HTTP tests
/// instead of skipping them.
const STRICT_ENV: &str = "RECIPE_PIPELINE_STRICT_HTTP_MOCKS";

/// Starts a wiremock server on loopback.
///
/// Returns `None` when this host refuses to bind a local port, which happens
/// in some build sandboxes; the caller then returns early.
pub async fn mock_backend() -> Option<MockServer> {
    if loopback_bindable() {
        return Some(MockServer::start().await);
    }

    let test = std::thread::current()
        .name()
        .unwrap_or("unnamed test")
        .to_string();
    assert!(
        std::env::var(STRICT_ENV).as_deref() != Ok("1"),
        "{test}: cannot bind 127.0.0.1 and {STRICT_ENV}=1"
    );
    eprintln!("{test}: loopback sockets unavailable, skipping mock backend test");
    None
}

fn loopback_bindable() -> bool {
    TcpListener::bind(("127.0.0.1", 0)).is_ok()
}
