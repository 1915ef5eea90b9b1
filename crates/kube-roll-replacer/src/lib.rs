//! Rolling pod replacement for kube-roll.
//!
//! This crate provides the [`Replacer`], which restarts the pods matching a
//! label selector one at a time:
//!
//! - Snapshot the matching pods into a FIFO deletion queue
//! - Delete the next pod and poll until it is gone
//! - Poll the listing until every newly observed pod is `Running`
//! - Record the replacements so later cycles do not count them again
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Replacer                            │
//! │  ┌──────────────┐ ┌──────────────┐ ┌─────────────────────┐  │
//! │  │  Deletion    │ │   Cycle      │ │   New pod           │  │
//! │  │  Queue       │ │   Lifecycle  │ │   Detection         │  │
//! │  └──────────────┘ └──────────────┘ └─────────────────────┘  │
//! │                         │                                    │
//! │               ┌─────────┴─────────┐                         │
//! │               ▼                   ▼                         │
//! │        ┌───────────┐       ┌───────────┐                    │
//! │        │  Poller   │       │  Retry    │                    │
//! │        └───────────┘       └───────────┘                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PodDirectory (Kubernetes API)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kube_roll_directory::K8sPodDirectory;
//! use kube_roll_replacer::{Replacer, RollConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = K8sPodDirectory::from_kubeconfig(None).await?;
//! let config = RollConfig::new("default", "app=web");
//!
//! let report = Replacer::new(Arc::new(directory), config).run().await?;
//! println!("replaced {} pods", report.deletions);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observer;
pub mod poll;
pub mod replacer;
pub mod retry;
pub mod tracking;

pub use config::{ReadinessMode, RetryPolicy, RollConfig};
pub use error::{ReplacerError, Result};
pub use lifecycle::{Cycle, CycleState};
pub use observer::{NoopObserver, ReplaceObserver};
pub use poll::{Polled, Poller};
pub use replacer::{ActiveCycle, CycleReport, Progress, Replacer, RunReport};
pub use tracking::{DeletionQueue, FinalizedSet, NewPods};
