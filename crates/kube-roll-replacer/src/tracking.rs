//! Pod set tracking.
//!
//! A run keeps two collections: the [`DeletionQueue`] of original pods still to
//! be replaced, and the [`FinalizedSet`] of replacement pods already confirmed.
//! On every readiness poll, [`NewPods::detect`] derives the replacement
//! candidates as a set difference:
//!
//! ```text
//! candidates = listed - still queued for deletion - already finalized
//! ```

use std::collections::{HashSet, VecDeque};

use kube_roll_directory::PodSummary;

use crate::config::ReadinessMode;

/// FIFO queue of pod names awaiting replacement.
#[derive(Debug, Clone, Default)]
pub struct DeletionQueue {
    names: VecDeque<String>,
}

impl DeletionQueue {
    /// Build the queue from a listing, preserving listing order.
    #[must_use]
    pub fn from_pods(pods: &[PodSummary]) -> Self {
        Self {
            names: pods.iter().map(|p| p.name.clone()).collect(),
        }
    }

    /// Remove and return the next pod to replace.
    pub fn pop_front(&mut self) -> Option<String> {
        self.names.pop_front()
    }

    /// Check if `name` is still waiting for replacement.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Number of pods still queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if every pod has been taken.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Queued names, front first.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }
}

/// Replacement pods confirmed running. Only ever grows.
#[derive(Debug, Clone, Default)]
pub struct FinalizedSet {
    order: Vec<String>,
    members: HashSet<String>,
}

impl FinalizedSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name`. Returns `false` if it was already finalized.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.members.contains(&name) {
            return false;
        }
        self.members.insert(name.clone());
        self.order.push(name);
        true
    }

    /// Check if `name` has been finalized.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    /// Number of finalized pods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing has been finalized yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Finalized names in insertion order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.order
    }
}

/// Pods observed in a listing that are neither queued nor finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPods {
    pods: Vec<PodSummary>,
}

impl NewPods {
    /// Compute `listed - pending - finalized`, keeping listing order.
    #[must_use]
    pub fn detect(listed: &[PodSummary], pending: &DeletionQueue, finalized: &FinalizedSet) -> Self {
        let pods = listed
            .iter()
            .filter(|p| !pending.contains(&p.name) && !finalized.contains(&p.name))
            .cloned()
            .collect();
        Self { pods }
    }

    /// Check if the candidates satisfy `mode`.
    ///
    /// Every candidate must be running. With no candidates at all, lenient mode
    /// reports ready and strict mode keeps waiting.
    #[must_use]
    pub fn is_ready(&self, mode: ReadinessMode) -> bool {
        if self.pods.is_empty() {
            return mode == ReadinessMode::Lenient;
        }
        self.pods.iter().all(|p| p.phase.is_ready())
    }

    /// The running candidates.
    pub fn running(&self) -> impl Iterator<Item = &PodSummary> {
        self.pods.iter().filter(|p| p.phase.is_ready())
    }

    /// Candidate names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.pods.iter().map(|p| p.name.as_str()).collect()
    }

    /// Check if no candidate was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}
