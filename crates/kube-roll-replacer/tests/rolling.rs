//! End-to-end rolling replacement runs against the in-memory pod directory.

use std::collections::HashSet;
use std::sync::Arc;

use kube_roll_directory::{
    DirectoryError, MockOperation, MockPodDirectory, PodPhase, ReplacementNaming, ReplacementPlan,
};
use kube_roll_replacer::{
    CycleState, ReadinessMode, ReplaceObserver, Replacer, ReplacerError, RollConfig,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

const NS: &str = "default";
const SELECTOR: &str = "run=hello";

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Deletions and finalizations only, in order.
    fn milestones(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("delete") || e.starts_with("finalized"))
            .collect()
    }

    fn ticks(&self, state: CycleState) -> usize {
        let suffix = format!(" {state}");
        self.events()
            .iter()
            .filter(|e| e.starts_with("tick") && e.ends_with(&suffix))
            .count()
    }
}

impl ReplaceObserver for Recorder {
    fn on_snapshot(&self, pods: &[String]) {
        self.events.lock().push(format!("snapshot {}", pods.join(",")));
    }

    fn on_state(&self, pod: &str, state: CycleState) {
        self.events.lock().push(format!("state {pod} {state}"));
    }

    fn on_delete(&self, pod: &str) {
        self.events.lock().push(format!("delete {pod}"));
    }

    fn on_poll_tick(&self, pod: &str, state: CycleState) {
        self.events.lock().push(format!("tick {pod} {state}"));
    }

    fn on_finalized(&self, pod: &str, replacements: &[String]) {
        self.events
            .lock()
            .push(format!("finalized {pod} [{}]", replacements.join(",")));
    }
}

/// Removes `target` from the cluster once the cycle for `after` completes.
struct RemoveAfterCycle {
    directory: Arc<MockPodDirectory>,
    after: &'static str,
    target: &'static str,
}

impl ReplaceObserver for RemoveAfterCycle {
    fn on_finalized(&self, pod: &str, _replacements: &[String]) {
        if pod == self.after {
            self.directory.remove_pod(NS, self.target);
        }
    }
}

/// Marks every generated replacement `Failed` as soon as its cycle starts
/// waiting for readiness.
struct FailReplacements {
    directory: Arc<MockPodDirectory>,
}

impl ReplaceObserver for FailReplacements {
    fn on_state(&self, _pod: &str, state: CycleState) {
        if state != CycleState::WaitingForReadyReplacement {
            return;
        }
        for name in self.directory.pod_names(NS) {
            if name.starts_with("replacement-") {
                self.directory.set_phase(NS, &name, PodPhase::Failed);
            }
        }
    }
}

fn directory_with(pods: &[&str]) -> Arc<MockPodDirectory> {
    let directory = Arc::new(MockPodDirectory::new());
    for pod in pods {
        directory.add_pod(NS, pod, &[("run", "hello")], PodPhase::Running);
    }
    directory
}

fn replacer_with(
    directory: &Arc<MockPodDirectory>,
    config: RollConfig,
) -> (Replacer, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let replacer = Replacer::new(directory.clone(), config).with_observer(recorder.clone());
    (replacer, recorder)
}

#[tokio::test(start_paused = true)]
async fn replaces_two_pods_one_at_a_time() {
    let directory = directory_with(&["p1", "p2"]);
    directory.linger_after_delete(1);
    directory.replace_deleted(ReplacementPlan::default());

    let (mut replacer, recorder) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(report.initial, ["p1", "p2"]);
    assert_eq!(report.deletions, 2);
    assert_eq!(directory.delete_calls(), 2);
    assert_eq!(directory.deleted(), ["p1", "p2"]);
    assert_eq!(
        recorder.milestones(),
        [
            "delete p1",
            "finalized p1 [replacement-1]",
            "delete p2",
            "finalized p2 [replacement-2]",
        ]
    );
    assert_eq!(report.finalized, ["replacement-1", "replacement-2"]);

    let first = &report.cycles[0];
    assert_eq!(first.pod, "p1");
    assert!(!first.already_gone);
    assert_eq!(first.termination_polls, 2);
    assert_eq!(first.readiness_polls, 2);
}

#[tokio::test(start_paused = true)]
async fn cycle_states_are_visited_in_order() {
    let directory = directory_with(&["p1"]);
    directory.replace_deleted(ReplacementPlan::default());

    let (mut replacer, recorder) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    replacer.run().await.unwrap();

    let states: Vec<String> = recorder
        .events()
        .into_iter()
        .filter(|e| e.starts_with("state"))
        .collect();
    assert_eq!(
        states,
        [
            "state p1 deleting",
            "state p1 waiting-for-termination",
            "state p1 waiting-for-ready-replacement",
            "state p1 finalized",
        ]
    );
    assert!(replacer.progress().active.is_none());
}

#[tokio::test(start_paused = true)]
async fn zero_matching_pods_is_a_no_op() {
    let directory = directory_with(&[]);
    directory.add_pod(NS, "db-1", &[("run", "db")], PodPhase::Running);

    let (mut replacer, recorder) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(report.deletions, 0);
    assert!(report.cycles.is_empty());
    assert_eq!(directory.delete_calls(), 0);
    assert_eq!(directory.get_calls(), 0);
    assert_eq!(recorder.events(), ["snapshot "]);
}

#[tokio::test(start_paused = true)]
async fn deletions_match_snapshot_despite_surge() {
    let directory = directory_with(&["p1", "p2", "p3"]);
    directory.replace_deleted(ReplacementPlan {
        per_deletion: 2,
        ..ReplacementPlan::default()
    });

    let (mut replacer, _) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(directory.delete_calls(), 3);
    assert_eq!(report.deletions, 3);
    assert_eq!(report.finalized.len(), 6);

    let unique: HashSet<_> = report.finalized.iter().collect();
    assert_eq!(unique.len(), report.finalized.len());

    // No replacement pod is ever deleted.
    assert_eq!(directory.deleted(), ["p1", "p2", "p3"]);
}

#[tokio::test(start_paused = true)]
async fn finalized_pods_are_not_counted_twice() {
    let directory = directory_with(&["p1", "p2"]);
    directory.replace_deleted(ReplacementPlan::default());

    let (mut replacer, _) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(report.cycles[0].replacements, ["replacement-1"]);
    assert_eq!(report.cycles[1].replacements, ["replacement-2"]);
    assert_eq!(replacer.finalized().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn same_name_replacement_is_detected() {
    let directory = directory_with(&["web-0", "web-1"]);
    directory.linger_after_delete(1);
    directory.replace_deleted(ReplacementPlan {
        naming: ReplacementNaming::SameName,
        per_deletion: 1,
        ready_after_lists: 1,
    });

    let (mut replacer, recorder) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(report.deletions, 2);
    assert_eq!(report.finalized, ["web-0", "web-1"]);
    assert_eq!(
        recorder.milestones(),
        [
            "delete web-0",
            "finalized web-0 [web-0]",
            "delete web-1",
            "finalized web-1 [web-1]",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn termination_wait_lasts_until_pod_is_gone() {
    let directory = directory_with(&["p1"]);
    directory.linger_after_delete(3);
    directory.replace_deleted(ReplacementPlan::default());

    let (mut replacer, recorder) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(report.cycles[0].termination_polls, 4);
    assert_eq!(directory.get_calls(), 4);
    assert_eq!(recorder.ticks(CycleState::WaitingForTermination), 4);
}

#[tokio::test(start_paused = true)]
async fn pod_already_gone_does_not_stop_the_run() {
    let directory = directory_with(&["p1", "p2"]);
    directory.replace_deleted(ReplacementPlan::default());
    let observer = Arc::new(RemoveAfterCycle {
        directory: directory.clone(),
        after: "p1",
        target: "p2",
    });

    let mut replacer =
        Replacer::new(directory.clone(), RollConfig::new(NS, SELECTOR)).with_observer(observer);
    let report = replacer.run().await.unwrap();

    assert_eq!(report.deletions, report.initial.len());
    assert_eq!(directory.delete_calls(), 2);
    assert_eq!(directory.deleted(), ["p1"]);

    assert!(!report.cycles[0].already_gone);
    let second = &report.cycles[1];
    assert_eq!(second.pod, "p2");
    assert!(second.already_gone);
    assert!(second.replacements.is_empty());
    assert_eq!(second.termination_polls, 1);
    assert_eq!(report.finalized, ["replacement-1"]);
}

#[tokio::test(start_paused = true)]
async fn failed_replacement_blocks_readiness_until_timeout() {
    let directory = directory_with(&["p1"]);
    directory.replace_deleted(ReplacementPlan::default());
    let observer = Arc::new(FailReplacements {
        directory: directory.clone(),
    });
    let config = RollConfig {
        wait_timeout_seconds: 20,
        ..RollConfig::new(NS, SELECTOR)
    };

    let mut replacer = Replacer::new(directory.clone(), config).with_observer(observer);
    let err = replacer.run().await.unwrap_err();

    assert!(matches!(
        &err,
        ReplacerError::Timeout { waiting_for, .. }
            if waiting_for == "a ready replacement for pod p1"
    ));
    assert_eq!(directory.pod_names(NS), ["replacement-1"]);

    let progress = replacer.progress();
    assert!(progress.finalized.is_empty());
    assert_eq!(
        progress.active.map(|a| a.state),
        Some(CycleState::WaitingForReadyReplacement)
    );
}

#[tokio::test(start_paused = true)]
async fn lenient_mode_accepts_missing_replacement() {
    let directory = directory_with(&["p1", "p2"]);

    let (mut replacer, _) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(report.deletions, 2);
    assert!(report.finalized.is_empty());
    assert!(report.cycles.iter().all(|c| c.readiness_polls == 1));
}

#[tokio::test(start_paused = true)]
async fn strict_mode_waits_for_a_replacement() {
    let directory = directory_with(&["p1"]);
    let config = RollConfig {
        readiness: ReadinessMode::Strict,
        wait_timeout_seconds: 30,
        ..RollConfig::new(NS, SELECTOR)
    };

    let (mut replacer, _) = replacer_with(&directory, config);
    let err = replacer.run().await.unwrap_err();

    match err {
        ReplacerError::Timeout { waiting_for, .. } => {
            assert_eq!(waiting_for, "a ready replacement for pod p1");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(replacer.progress().deletions, 1);
}

#[tokio::test(start_paused = true)]
async fn strict_mode_succeeds_with_replacement() {
    let directory = directory_with(&["p1"]);
    directory.replace_deleted(ReplacementPlan {
        ready_after_lists: 3,
        ..ReplacementPlan::default()
    });
    let config = RollConfig {
        readiness: ReadinessMode::Strict,
        ..RollConfig::new(NS, SELECTOR)
    };

    let (mut replacer, _) = replacer_with(&directory, config);
    let report = replacer.run().await.unwrap();

    assert_eq!(report.finalized, ["replacement-1"]);
    assert_eq!(report.cycles[0].readiness_polls, 4);
}

#[tokio::test(start_paused = true)]
async fn pod_that_never_terminates_times_out() {
    let directory = directory_with(&["p1", "p2"]);
    directory.linger_after_delete(u32::MAX);
    let config = RollConfig {
        wait_timeout_seconds: 10,
        ..RollConfig::new(NS, SELECTOR)
    };

    let (mut replacer, _) = replacer_with(&directory, config);
    let err = replacer.run().await.unwrap_err();

    assert!(matches!(
        &err,
        ReplacerError::Timeout { waiting_for, .. } if waiting_for == "pod p1 to terminate"
    ));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(directory.delete_calls(), 1);

    let progress = replacer.progress();
    assert_eq!(progress.remaining, ["p2"]);
    assert_eq!(
        progress.active.map(|a| a.state),
        Some(CycleState::WaitingForTermination)
    );
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried() {
    let directory = directory_with(&["p1"]);
    directory.replace_deleted(ReplacementPlan::default());
    directory.fail_next(
        MockOperation::Delete,
        DirectoryError::from_status(503, "ServiceUnavailable", "etcd leader changed"),
    );
    directory.fail_next(MockOperation::Get, DirectoryError::Transport("reset".into()));

    let (mut replacer, _) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let report = replacer.run().await.unwrap();

    assert_eq!(report.deletions, 1);
    assert_eq!(directory.delete_calls(), 2);
    assert_eq!(directory.deleted(), ["p1"]);
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_abort_the_run() {
    let directory = directory_with(&["p1"]);
    directory.fail_next(
        MockOperation::List,
        DirectoryError::Unauthorized("token expired".into()),
    );

    let (mut replacer, _) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let err = replacer.run().await.unwrap_err();

    assert!(matches!(
        err,
        ReplacerError::Directory(DirectoryError::Unauthorized(_))
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(directory.list_calls(), 1);
    assert_eq!(directory.delete_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_selector_is_not_retried() {
    let directory = directory_with(&["p1"]);

    let (mut replacer, _) = replacer_with(&directory, RollConfig::new(NS, "run"));
    let err = replacer.run().await.unwrap_err();

    assert!(matches!(
        err,
        ReplacerError::Directory(DirectoryError::InvalidRequest(_))
    ));
    assert_eq!(directory.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_wait() {
    let directory = directory_with(&["p1", "p2"]);
    directory.linger_after_delete(u32::MAX);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (replacer, _) = replacer_with(&directory, RollConfig::new(NS, SELECTOR));
    let mut replacer = replacer.with_cancellation(cancel);
    let err = replacer.run().await.unwrap_err();

    assert!(matches!(err, ReplacerError::Cancelled));
    assert_eq!(err.exit_code(), 130);
    assert_eq!(directory.delete_calls(), 1);
    assert_eq!(directory.get_calls(), 0);
}
