//! Kubernetes pod directory implementation.
//!
//! This module provides the [`PodDirectory`] trait and the kube-backed
//! [`K8sPodDirectory`].

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::{debug, warn};

use crate::types::{DeleteOutcome, PodSummary};
use crate::{DirectoryError, Result};

/// The `PodDirectory` trait is the cluster surface a rolling restart needs.
#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// List the pods in `namespace` matching `label_selector`, in API order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSummary>>;

    /// Delete a pod by name.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails (except 404).
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<DeleteOutcome>;

    /// Look up a pod by name, returning `None` once it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod cannot be retrieved.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodSummary>>;
}

/// Pod directory backed by a Kubernetes API server.
#[derive(Clone)]
pub struct K8sPodDirectory {
    client: Client,
}

impl K8sPodDirectory {
    /// Connect to a cluster.
    ///
    /// With a kubeconfig path, the current context of that file is used.
    /// Without one, the configuration is inferred from the environment
    /// (`KUBECONFIG`, `~/.kube/config` or the in-cluster service account).
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or the client cannot
    /// be created.
    pub async fn from_kubeconfig(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    DirectoryError::Config(format!(
                        "failed to read kubeconfig {}: {e}",
                        path.display()
                    ))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        DirectoryError::Config(format!(
                            "invalid kubeconfig {}: {e}",
                            path.display()
                        ))
                    })?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| DirectoryError::Config(format!("failed to infer config: {e}")))?,
        };

        debug!(cluster_url = %config.cluster_url, "Loaded cluster configuration");

        let client = Client::try_from(config)?;
        Ok(Self::with_client(client))
    }

    /// Create a directory around a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn pods_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodDirectory for K8sPodDirectory {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSummary>> {
        let params = ListParams::default().labels(label_selector);
        let pod_list = self.pods_api(namespace).list(&params).await?;

        let pods: Vec<PodSummary> = pod_list.items.iter().filter_map(PodSummary::from_pod).collect();
        debug!(namespace, label_selector, count = pods.len(), "Listed pods");

        Ok(pods)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        match self
            .pods_api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                debug!(namespace, pod = name, "Deleted pod");
                Ok(DeleteOutcome::Deleted)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!(namespace, pod = name, "Pod not found, already deleted");
                Ok(DeleteOutcome::AlreadyGone)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodSummary>> {
        let pod = self.pods_api(namespace).get_opt(name).await?;
        Ok(pod.as_ref().and_then(PodSummary::from_pod))
    }
}

/// An in-memory pod directory for testing without a real Kubernetes cluster.
///
/// Besides storing pods, the mock plays the part of a workload controller: it
/// can keep deleted pods around for a few lookups and spawn replacement pods
/// that start `Pending` and turn `Running` after a number of listings.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{BTreeMap, HashMap, VecDeque};

    use parking_lot::Mutex;

    use super::*;
    use crate::types::PodPhase;

    /// Directory operations the mock can be told to fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum MockOperation {
        /// `list_pods`.
        List,
        /// `delete_pod`.
        Delete,
        /// `get_pod`.
        Get,
    }

    /// How replacement pods are named.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ReplacementNaming {
        /// Fresh names (`replacement-1`, `replacement-2`, ...), spawned as soon
        /// as the old pod is deleted.
        Generated,
        /// The deleted pod's own name, spawned once the old pod is gone.
        SameName,
    }

    /// How the mock replaces deleted pods.
    #[derive(Debug, Clone, Copy)]
    pub struct ReplacementPlan {
        /// Naming scheme for replacements.
        pub naming: ReplacementNaming,
        /// Number of pods spawned per deletion (generated naming only).
        pub per_deletion: usize,
        /// Listings a replacement stays `Pending` for; `0` starts it `Running`.
        pub ready_after_lists: u32,
    }

    impl Default for ReplacementPlan {
        fn default() -> Self {
            Self {
                naming: ReplacementNaming::Generated,
                per_deletion: 1,
                ready_after_lists: 1,
            }
        }
    }

    /// A mock pod directory that stores pods in memory.
    #[derive(Default)]
    pub struct MockPodDirectory {
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        pods: Vec<MockPod>,
        linger_gets: u32,
        replacement: Option<ReplacementPlan>,
        generated: usize,
        failures: HashMap<MockOperation, VecDeque<DirectoryError>>,
        list_calls: usize,
        delete_calls: usize,
        get_calls: usize,
        deleted: Vec<String>,
    }

    #[derive(Clone)]
    struct MockPod {
        namespace: String,
        name: String,
        labels: BTreeMap<String, String>,
        phase: PodPhase,
        lists_until_running: Option<u32>,
        terminating: Option<u32>,
    }

    impl MockPod {
        fn summary(&self) -> PodSummary {
            PodSummary::new(self.name.clone(), self.phase)
        }

        fn matches(&self, requirements: &[(String, String)]) -> bool {
            requirements
                .iter()
                .all(|(key, value)| self.labels.get(key) == Some(value))
        }
    }

    impl MockState {
        fn take_failure(&mut self, op: MockOperation) -> Result<()> {
            match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn position(&self, namespace: &str, name: &str) -> Option<usize> {
            self.pods
                .iter()
                .position(|p| p.namespace == namespace && p.name == name)
        }

        fn advance_pending(&mut self, namespace: &str) {
            for pod in self.pods.iter_mut().filter(|p| p.namespace == namespace) {
                match pod.lists_until_running {
                    Some(n) if n <= 1 => {
                        pod.phase = PodPhase::Running;
                        pod.lists_until_running = None;
                    }
                    Some(n) => pod.lists_until_running = Some(n - 1),
                    None => {}
                }
            }
        }

        fn replacement_pod(plan: &ReplacementPlan, template: &MockPod, name: String) -> MockPod {
            let starts_running = plan.ready_after_lists == 0;
            MockPod {
                namespace: template.namespace.clone(),
                name,
                labels: template.labels.clone(),
                phase: if starts_running {
                    PodPhase::Running
                } else {
                    PodPhase::Pending
                },
                lists_until_running: (!starts_running).then_some(plan.ready_after_lists),
                terminating: None,
            }
        }

        fn spawn_generated(&mut self, template: &MockPod) {
            let Some(plan) = self.replacement else {
                return;
            };
            if plan.naming != ReplacementNaming::Generated {
                return;
            }
            for _ in 0..plan.per_deletion {
                self.generated += 1;
                let name = format!("replacement-{}", self.generated);
                self.pods.push(Self::replacement_pod(&plan, template, name));
            }
        }

        fn remove(&mut self, index: usize) {
            let pod = self.pods.remove(index);
            if let Some(plan) = self.replacement {
                if plan.naming == ReplacementNaming::SameName {
                    let name = pod.name.clone();
                    self.pods.push(Self::replacement_pod(&plan, &pod, name));
                }
            }
        }
    }

    fn parse_selector(selector: &str) -> Result<Vec<(String, String)>> {
        selector
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (key, value) = part
                    .split_once("==")
                    .or_else(|| part.split_once('='))
                    .ok_or_else(|| {
                        DirectoryError::InvalidRequest(format!(
                            "unable to parse requirement: {part}"
                        ))
                    })?;
                Ok((key.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    impl MockPodDirectory {
        /// Create a new empty mock directory.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a pod with the given labels and phase.
        pub fn add_pod(&self, namespace: &str, name: &str, labels: &[(&str, &str)], phase: PodPhase) {
            self.state.lock().pods.push(MockPod {
                namespace: namespace.to_string(),
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                phase,
                lists_until_running: None,
                terminating: None,
            });
        }

        /// Set the phase of an existing pod.
        pub fn set_phase(&self, namespace: &str, name: &str, phase: PodPhase) {
            let mut state = self.state.lock();
            if let Some(index) = state.position(namespace, name) {
                state.pods[index].phase = phase;
                state.pods[index].lists_until_running = None;
            }
        }

        /// Drop a pod at once, as if another client had deleted it. No
        /// replacement is spawned. Returns false if the pod was not stored.
        pub fn remove_pod(&self, namespace: &str, name: &str) -> bool {
            let mut state = self.state.lock();
            match state.position(namespace, name) {
                Some(index) => {
                    state.pods.remove(index);
                    true
                }
                None => false,
            }
        }

        /// Keep deleted pods visible to `get_pod` for this many lookups.
        pub fn linger_after_delete(&self, gets: u32) {
            self.state.lock().linger_gets = gets;
        }

        /// Spawn replacement pods for every deletion.
        pub fn replace_deleted(&self, plan: ReplacementPlan) {
            self.state.lock().replacement = Some(plan);
        }

        /// Fail the next call of `op` with `error`. Queued errors are returned in order.
        pub fn fail_next(&self, op: MockOperation, error: DirectoryError) {
            self.state
                .lock()
                .failures
                .entry(op)
                .or_default()
                .push_back(error);
        }

        /// Number of `list_pods` calls, including failed ones.
        #[must_use]
        pub fn list_calls(&self) -> usize {
            self.state.lock().list_calls
        }

        /// Number of `delete_pod` calls, including failed ones.
        #[must_use]
        pub fn delete_calls(&self) -> usize {
            self.state.lock().delete_calls
        }

        /// Number of `get_pod` calls, including failed ones.
        #[must_use]
        pub fn get_calls(&self) -> usize {
            self.state.lock().get_calls
        }

        /// Names of pods whose deletion was accepted, in call order.
        #[must_use]
        pub fn deleted(&self) -> Vec<String> {
            self.state.lock().deleted.clone()
        }

        /// Names of the pods currently stored in `namespace`.
        #[must_use]
        pub fn pod_names(&self, namespace: &str) -> Vec<String> {
            self.state
                .lock()
                .pods
                .iter()
                .filter(|p| p.namespace == namespace)
                .map(|p| p.name.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PodDirectory for MockPodDirectory {
        async fn list_pods(
            &self,
            namespace: &str,
            label_selector: &str,
        ) -> Result<Vec<PodSummary>> {
            let mut state = self.state.lock();
            state.list_calls += 1;
            state.take_failure(MockOperation::List)?;

            let requirements = parse_selector(label_selector)?;
            let listed = state
                .pods
                .iter()
                .filter(|p| p.namespace == namespace && p.matches(&requirements))
                .map(MockPod::summary)
                .collect();

            state.advance_pending(namespace);
            Ok(listed)
        }

        async fn delete_pod(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
            let mut state = self.state.lock();
            state.delete_calls += 1;
            state.take_failure(MockOperation::Delete)?;

            let Some(index) = state.position(namespace, name) else {
                return Ok(DeleteOutcome::AlreadyGone);
            };
            if state.pods[index].terminating.is_some() {
                return Ok(DeleteOutcome::Deleted);
            }

            state.deleted.push(name.to_string());
            let template = state.pods[index].clone();
            let linger = state.linger_gets;
            if linger == 0 {
                state.remove(index);
            } else {
                state.pods[index].terminating = Some(linger);
            }
            state.spawn_generated(&template);

            Ok(DeleteOutcome::Deleted)
        }

        async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodSummary>> {
            let mut state = self.state.lock();
            state.get_calls += 1;
            state.take_failure(MockOperation::Get)?;

            let Some(index) = state.position(namespace, name) else {
                return Ok(None);
            };

            match state.pods[index].terminating {
                Some(0) => {
                    state.remove(index);
                    Ok(None)
                }
                Some(n) => {
                    state.pods[index].terminating = Some(n - 1);
                    Ok(Some(state.pods[index].summary()))
                }
                None => Ok(Some(state.pods[index].summary())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::mock::{MockOperation, MockPodDirectory, ReplacementNaming, ReplacementPlan};
    use super::*;
    use crate::types::PodPhase;

    const NS: &str = "default";

    fn directory_with_web_pods() -> MockPodDirectory {
        let directory = MockPodDirectory::new();
        directory.add_pod(NS, "web-1", &[("app", "web")], PodPhase::Running);
        directory.add_pod(NS, "web-2", &[("app", "web")], PodPhase::Running);
        directory.add_pod(NS, "db-1", &[("app", "db")], PodPhase::Running);
        directory.add_pod("other", "web-3", &[("app", "web")], PodPhase::Running);
        directory
    }

    #[tokio::test]
    async fn mock_list_filters_by_namespace_and_selector() {
        let directory = directory_with_web_pods();

        let pods = directory.list_pods(NS, "app=web").await.unwrap();
        let names: Vec<_> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["web-1", "web-2"]);

        let all = directory.list_pods(NS, "").await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(directory.list_calls(), 2);
    }

    #[tokio::test]
    async fn mock_rejects_malformed_selector() {
        let directory = directory_with_web_pods();

        let err = directory.list_pods(NS, "app").await.unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidRequest(_)));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn mock_delete_and_get() {
        let directory = directory_with_web_pods();

        let outcome = directory.delete_pod(NS, "web-1").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(directory.get_pod(NS, "web-1").await.unwrap().is_none());

        let outcome = directory.delete_pod(NS, "web-1").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::AlreadyGone);
        assert_eq!(directory.deleted(), ["web-1"]);
        assert_eq!(directory.delete_calls(), 2);
    }

    #[tokio::test]
    async fn mock_externally_removed_pod_is_already_gone() {
        let directory = directory_with_web_pods();
        directory.replace_deleted(ReplacementPlan::default());

        assert!(directory.remove_pod(NS, "web-2"));
        assert!(!directory.remove_pod(NS, "web-2"));
        assert_eq!(directory.pod_names(NS), ["web-1", "db-1"]);

        let outcome = directory.delete_pod(NS, "web-2").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::AlreadyGone);
        assert!(directory.deleted().is_empty());
        assert_eq!(directory.pod_names(NS), ["web-1", "db-1"]);
    }

    #[tokio::test]
    async fn mock_lingering_pod_disappears_after_lookups() {
        let directory = directory_with_web_pods();
        directory.linger_after_delete(2);

        directory.delete_pod(NS, "web-1").await.unwrap();
        assert!(directory.get_pod(NS, "web-1").await.unwrap().is_some());
        assert!(directory.get_pod(NS, "web-1").await.unwrap().is_some());
        assert!(directory.get_pod(NS, "web-1").await.unwrap().is_none());
        assert_eq!(directory.get_calls(), 3);
    }

    #[tokio::test]
    async fn mock_generated_replacement_becomes_running() {
        let directory = directory_with_web_pods();
        directory.replace_deleted(ReplacementPlan::default());

        directory.delete_pod(NS, "web-1").await.unwrap();

        let first = directory.list_pods(NS, "app=web").await.unwrap();
        assert!(first.contains(&PodSummary::new("replacement-1", PodPhase::Pending)));

        let second = directory.list_pods(NS, "app=web").await.unwrap();
        assert!(second.contains(&PodSummary::new("replacement-1", PodPhase::Running)));
    }

    #[tokio::test]
    async fn mock_same_name_replacement_after_removal() {
        let directory = directory_with_web_pods();
        directory.linger_after_delete(1);
        directory.replace_deleted(ReplacementPlan {
            naming: ReplacementNaming::SameName,
            per_deletion: 1,
            ready_after_lists: 0,
        });

        directory.delete_pod(NS, "web-2").await.unwrap();
        assert!(directory.get_pod(NS, "web-2").await.unwrap().is_some());
        assert!(directory.get_pod(NS, "web-2").await.unwrap().is_none());

        let pods = directory.list_pods(NS, "app=web").await.unwrap();
        assert!(pods.contains(&PodSummary::new("web-2", PodPhase::Running)));
    }

    #[tokio::test]
    async fn mock_injected_failures_are_consumed_in_order() {
        let directory = directory_with_web_pods();
        directory.fail_next(MockOperation::Get, DirectoryError::Transport("reset".into()));

        assert!(directory.get_pod(NS, "web-1").await.is_err());
        assert!(directory.get_pod(NS, "web-1").await.unwrap().is_some());
        assert_eq!(directory.get_calls(), 2);
    }

    #[tokio::test]
    async fn unreadable_kubeconfig_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clusters: [not valid").unwrap();

        let result = K8sPodDirectory::from_kubeconfig(Some(file.path())).await;
        assert!(matches!(result, Err(DirectoryError::Config(_))));

        let missing = file.path().with_extension("missing");
        let result = K8sPodDirectory::from_kubeconfig(Some(missing.as_path())).await;
        assert!(matches!(result, Err(DirectoryError::Config(_))));
    }
}
