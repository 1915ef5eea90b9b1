//! Kubeconfig location.

use std::path::{Path, PathBuf};

/// Pick the kubeconfig file to load.
///
/// An explicit path always wins. When `KUBECONFIG` is set it may list several
/// files, so loading is left to client inference. Otherwise
/// `<home>/.kube/config` is used when it exists. `None` means the client
/// configuration is inferred (`KUBECONFIG` or the in-cluster service account).
pub fn resolve_kubeconfig(
    explicit: Option<PathBuf>,
    env_configured: bool,
    home: Option<&Path>,
) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    if env_configured {
        return None;
    }

    let candidate = home?.join(".kube").join("config");
    candidate.is_file().then_some(candidate)
}
