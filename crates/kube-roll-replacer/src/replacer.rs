//! The rolling replacer.
//!
//! [`Replacer::run`] snapshots the pods matching the selector and then replaces
//! them strictly one at a time: delete, wait until the pod is gone, wait until
//! the newly observed pods are running, then move on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube_roll_directory::{DeleteOutcome, PodDirectory};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RollConfig;
use crate::error::{ReplacerError, Result};
use crate::lifecycle::{Cycle, CycleState};
use crate::observer::{NoopObserver, ReplaceObserver};
use crate::poll::{Polled, Poller};
use crate::retry::with_retry;
use crate::tracking::{DeletionQueue, FinalizedSet, NewPods};

/// Outcome of one completed replacement cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// The original pod that was deleted.
    pub pod: String,
    /// Whether the pod was already gone when the delete request was sent.
    pub already_gone: bool,
    /// Replacement pods finalized by this cycle.
    pub replacements: Vec<String>,
    /// Polls spent waiting for the pod to disappear.
    pub termination_polls: u32,
    /// Polls spent waiting for a ready replacement.
    pub readiness_polls: u32,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Namespace the run operated in.
    pub namespace: String,
    /// Selector that chose the pods.
    pub label_selector: String,
    /// Pods in the initial snapshot, in listing order.
    pub initial: Vec<String>,
    /// Delete requests issued. Always equals `initial.len()`.
    pub deletions: usize,
    /// Completed cycles in order.
    pub cycles: Vec<CycleReport>,
    /// Every finalized replacement pod.
    pub finalized: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last cycle completed.
    pub finished_at: DateTime<Utc>,
}

/// The cycle that was running when progress was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCycle {
    /// Pod being replaced.
    pub pod: String,
    /// State the cycle had reached.
    pub state: CycleState,
}

/// Point-in-time view of a run, available after a failure.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    /// Pods in the initial snapshot; empty if the snapshot was never taken.
    pub initial: Vec<String>,
    /// Completed cycles.
    pub completed: Vec<CycleReport>,
    /// The unfinished cycle, if any.
    pub active: Option<ActiveCycle>,
    /// Pods not yet taken from the queue.
    pub remaining: Vec<String>,
    /// Finalized replacement pods.
    pub finalized: Vec<String>,
    /// Delete requests issued.
    pub deletions: usize,
}

/// Replaces the pods matching a selector one at a time.
pub struct Replacer {
    directory: Arc<dyn PodDirectory>,
    config: RollConfig,
    observer: Arc<dyn ReplaceObserver>,
    cancel: CancellationToken,
    initial: Option<Vec<String>>,
    queue: DeletionQueue,
    finalized: FinalizedSet,
    cycles: Vec<CycleReport>,
    active: Option<Cycle>,
    deletions: usize,
}

impl Replacer {
    /// Create a replacer over `directory`.
    #[must_use]
    pub fn new(directory: Arc<dyn PodDirectory>, config: RollConfig) -> Self {
        Self {
            directory,
            config,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
            initial: None,
            queue: DeletionQueue::default(),
            finalized: FinalizedSet::new(),
            cycles: Vec::new(),
            active: None,
            deletions: 0,
        }
    }

    /// Report progress to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ReplaceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Stop waiting as soon as `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get a reference to the run configuration.
    #[must_use]
    pub fn config(&self) -> &RollConfig {
        &self.config
    }

    /// Replacement pods finalized so far.
    #[must_use]
    pub fn finalized(&self) -> &FinalizedSet {
        &self.finalized
    }

    /// Snapshot of how far the run got.
    #[must_use]
    pub fn progress(&self) -> Progress {
        Progress {
            initial: self.initial.clone().unwrap_or_default(),
            completed: self.cycles.clone(),
            active: self.active.as_ref().map(|c| ActiveCycle {
                pod: c.pod().to_string(),
                state: c.state(),
            }),
            remaining: self.queue.names(),
            finalized: self.finalized.names().to_vec(),
            deletions: self.deletions,
        }
    }

    /// Run the rolling replacement to completion.
    ///
    /// A replacer runs once; the initial snapshot is never retaken.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a directory call fails
    /// permanently or exhausts its retries, a wait times out, or the run is
    /// cancelled. [`Replacer::progress`] still describes the partial run.
    pub async fn run(&mut self) -> Result<RunReport> {
        self.config.validate()?;
        if self.initial.is_some() {
            return Err(ReplacerError::Config(
                "replacer has already been run".to_string(),
            ));
        }

        let started_at = Utc::now();
        let initial = self.take_snapshot().await?;

        while let Some(pod) = self.queue.pop_front() {
            let report = self.replace(pod).await?;
            self.cycles.push(report);
        }

        debug_assert_eq!(self.deletions, initial.len());
        info!(
            namespace = %self.config.namespace,
            deletions = self.deletions,
            finalized = self.finalized.len(),
            "Rolling replacement complete"
        );

        Ok(RunReport {
            namespace: self.config.namespace.clone(),
            label_selector: self.config.label_selector.clone(),
            initial,
            deletions: self.deletions,
            cycles: self.cycles.clone(),
            finalized: self.finalized.names().to_vec(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn poller(&self) -> Poller {
        Poller::new(self.config.poll_interval(), self.config.wait_timeout())
    }

    async fn take_snapshot(&mut self) -> Result<Vec<String>> {
        let namespace = self.config.namespace.as_str();
        let selector = self.config.label_selector.as_str();
        let directory = self.directory.as_ref();

        let listed = with_retry(&self.config.retry, &self.cancel, "list_pods", || {
            directory.list_pods(namespace, selector)
        })
        .await?;

        self.queue = DeletionQueue::from_pods(&listed);
        let initial = self.queue.names();

        info!(
            namespace,
            label_selector = selector,
            count = initial.len(),
            pods = ?initial,
            "Captured initial pod snapshot"
        );
        self.observer.on_snapshot(&initial);
        self.initial = Some(initial.clone());

        Ok(initial)
    }

    fn track(&mut self, cycle: &Cycle) {
        debug!(pod = cycle.pod(), state = %cycle.state(), "Cycle state changed");
        self.observer.on_state(cycle.pod(), cycle.state());
        self.active = Some(cycle.clone());
    }

    async fn replace(&mut self, pod: String) -> Result<CycleReport> {
        info!(
            namespace = %self.config.namespace,
            pod = %pod,
            remaining = self.queue.len(),
            "Starting replacement cycle"
        );

        let mut cycle = Cycle::start(pod.clone());
        self.track(&cycle);

        let outcome = self.delete(&pod).await?;
        self.deletions += 1;
        self.observer.on_delete(&pod);

        cycle.advance(CycleState::WaitingForTermination)?;
        self.track(&cycle);
        let termination = self.wait_for_termination(&pod).await?;

        cycle.advance(CycleState::WaitingForReadyReplacement)?;
        self.track(&cycle);
        let readiness = self.wait_for_ready_replacement(&pod).await?;

        if readiness.value.is_empty() {
            warn!(pod = %pod, "No replacement pod observed, treating cycle as ready");
        }
        let mut replacements = Vec::new();
        for candidate in readiness.value.running() {
            if self.finalized.insert(candidate.name.clone()) {
                replacements.push(candidate.name.clone());
            }
        }

        cycle.advance(CycleState::Finalized)?;
        self.track(&cycle);
        self.active = None;

        info!(
            pod = %pod,
            replacements = ?replacements,
            termination_polls = termination.attempts,
            readiness_polls = readiness.attempts,
            "Replacement cycle finalized"
        );
        self.observer.on_finalized(&pod, &replacements);

        Ok(CycleReport {
            pod,
            already_gone: outcome == DeleteOutcome::AlreadyGone,
            replacements,
            termination_polls: termination.attempts,
            readiness_polls: readiness.attempts,
        })
    }

    async fn delete(&self, pod: &str) -> Result<DeleteOutcome> {
        let namespace = self.config.namespace.as_str();
        let directory = self.directory.as_ref();

        let outcome = with_retry(&self.config.retry, &self.cancel, "delete_pod", || {
            directory.delete_pod(namespace, pod)
        })
        .await?;

        match outcome {
            DeleteOutcome::Deleted => info!(namespace, pod, "Deleted pod"),
            DeleteOutcome::AlreadyGone => warn!(namespace, pod, "Pod was already gone"),
        }
        Ok(outcome)
    }

    async fn wait_for_termination(&self, pod: &str) -> Result<Polled<()>> {
        let directory = self.directory.as_ref();
        let observer = self.observer.as_ref();
        let namespace = self.config.namespace.as_str();
        let retry = &self.config.retry;
        let cancel = &self.cancel;

        self.poller()
            .until(cancel, &format!("pod {pod} to terminate"), move || async move {
                observer.on_poll_tick(pod, CycleState::WaitingForTermination);
                let found = with_retry(retry, cancel, "get_pod", || {
                    directory.get_pod(namespace, pod)
                })
                .await?;

                match found {
                    Some(current) => {
                        debug!(pod, phase = %current.phase, "Pod still present");
                        Ok(None)
                    }
                    None => Ok(Some(())),
                }
            })
            .await
    }

    async fn wait_for_ready_replacement(&self, pod: &str) -> Result<Polled<NewPods>> {
        let directory = self.directory.as_ref();
        let observer = self.observer.as_ref();
        let namespace = self.config.namespace.as_str();
        let selector = self.config.label_selector.as_str();
        let mode = self.config.readiness;
        let retry = &self.config.retry;
        let cancel = &self.cancel;
        let queue = &self.queue;
        let finalized = &self.finalized;

        self.poller()
            .until(
                cancel,
                &format!("a ready replacement for pod {pod}"),
                move || async move {
                    observer.on_poll_tick(pod, CycleState::WaitingForReadyReplacement);
                    let listed = with_retry(retry, cancel, "list_pods", || {
                        directory.list_pods(namespace, selector)
                    })
                    .await?;

                    let new_pods = NewPods::detect(&listed, queue, finalized);
                    debug!(pod, candidates = ?new_pods.names(), "Checked for replacement pods");
                    Ok(new_pods.is_ready(mode).then_some(new_pods))
                },
            )
            .await
    }
}
