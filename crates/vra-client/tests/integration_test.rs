//! Integration tests for the Aria Automation client
//!
//! These tests require a reachable Aria Automation instance.
//! Set VRA_URL and VRA_REFRESH_TOKEN environment variables to run.

use vra_client::{VraClient, VraClientTrait};

fn connect_args() -> (String, String) {
    let url = std::env::var("VRA_URL")
        .unwrap_or_else(|_| "https://vra.example.com".to_string());
    let token = std::env::var("VRA_REFRESH_TOKEN")
        .expect("VRA_REFRESH_TOKEN environment variable must be set");
    (url, token)
}

#[tokio::test]
#[ignore] // Requires Aria Automation instance
async fn test_login() {
    let (url, token) = connect_args();
    let client = VraClient::connect(url, token, true).await;
    assert!(client.is_ok(), "Failed to log in");
}

#[tokio::test]
#[ignore]
async fn test_find_machines_by_unknown_tag() {
    let (url, token) = connect_args();
    let client = VraClient::connect(url, token, true).await.expect("Failed to log in");

    let machines = client
        .find_machines_by_tag("k8s_name", "does-not-exist-7f3a")
        .await
        .expect("Failed to query machines");
    assert!(machines.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_unknown_request_tracker_is_not_found() {
    let (url, token) = connect_args();
    let client = VraClient::connect(url, token, true).await.expect("Failed to log in");

    let result = client.get_request_tracker("00000000-0000-0000-0000-000000000000").await;
    assert!(matches!(result, Err(vra_client::VraError::NotFound(_))));
}
