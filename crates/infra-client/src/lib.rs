//! Object-store client for the Tinkerbell machine controller
//!
//! Wraps the Kubernetes API behind [`InfraClientTrait`] so the reconciler can
//! be exercised against an in-memory store in unit tests.
//!
//! # Example
//!
//! ```no_run
//! use infra_client::{InfraClient, InfraClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InfraClient::new(kube::Client::try_default().await?);
//!
//! // Hardware currently owned by a machine
//! let owned = client
//!     .list_hardware("default", Some("v1alpha1.tinkerbell.org/ownerName=worker-0"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod infra_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::InfraClient;
pub use error::InfraError;
pub use infra_trait::InfraClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockInfraClient;
