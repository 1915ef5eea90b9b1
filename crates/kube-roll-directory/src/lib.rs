//! Pod directory for kube-roll.
//!
//! This crate provides the [`PodDirectory`] trait, the small slice of the
//! Kubernetes API a rolling restart needs, and the [`K8sPodDirectory`]
//! implementation backed by `kube`:
//!
//! - List pods in a namespace by label selector
//! - Delete a pod by name, treating "already gone" as success
//! - Look up a pod by name, reporting "not found" as `None`
//!
//! # Example
//!
//! ```no_run
//! use kube_roll_directory::{K8sPodDirectory, PodDirectory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = K8sPodDirectory::from_kubeconfig(None).await?;
//!
//! for pod in directory.list_pods("default", "app=web").await? {
//!     println!("{} is {}", pod.name, pod.phase);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to use the in-memory mock:
//!
//! ```ignore
//! use kube_roll_directory::{MockPodDirectory, PodDirectory, PodPhase};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = MockPodDirectory::new();
//! directory.add_pod("default", "web-1", &[("app", "web")], PodPhase::Running);
//!
//! assert_eq!(directory.list_pods("default", "app=web").await?.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod k8s;
pub mod types;

pub use error::{DirectoryError, Result};
pub use k8s::{K8sPodDirectory, PodDirectory};
pub use types::{DeleteOutcome, PodPhase, PodSummary};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock::{MockOperation, MockPodDirectory, ReplacementNaming, ReplacementPlan};
