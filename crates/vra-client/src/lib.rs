//! Aria Automation (vRealize Automation) IaaS API Client
//!
//! A Rust client library for the `/iaas/api` endpoints used to provision
//! virtual machines: machine lookup by tag, create/delete submission and
//! asynchronous request tracking.
//!
//! # Example
//!
//! ```no_run
//! use vra_client::{VraClient, VraClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a client and exchange the refresh token for a bearer token
//! let client = VraClient::connect(
//!     "https://vra.example.com".to_string(),
//!     "your-refresh-token".to_string(),
//!     false,
//! ).await?;
//!
//! // Find machines tagged k8s_name=web-01
//! let machines = client.find_machines_by_tag("k8s_name", "web-01").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod vra_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::VraClient;
pub use common::HttpClient;
pub use error::VraError;
pub use models::*;
pub use vra_trait::VraClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockFault, MockOperation, MockVraClient};
