//! Background polling of a project's Git sync status.

use std::sync::Arc;
use std::time::Duration;

use ragchat_backend_client::RagBackend;
use ragchat_protocol::FileNode;
use ragchat_protocol::GitConfig;
use ragchat_protocol::ProjectId;
use ragchat_protocol::SyncStatus;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::active_cell::ActiveReader;

pub const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_SYNC_MAX_POLLS: u32 = 200;
pub const SYNC_FAILED_FALLBACK: &str = "Git sync failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPollerOptions {
    pub interval: Duration,
    /// Status checks made before giving up on a sync that never leaves
    /// `syncing`.
    pub max_polls: u32,
}

impl Default for SyncPollerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_POLL_INTERVAL,
            max_polls: DEFAULT_SYNC_MAX_POLLS,
        }
    }
}

/// How a poll ended. Never produced for a poller that was stopped first.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The backend no longer reports a sync in progress (the repository was
    /// unlinked, or the status is empty).
    Stopped,
    /// The sync finished. `files` is the refreshed tree when the project was
    /// still expanded at that point, `None` otherwise.
    Succeeded {
        config: GitConfig,
        files: Option<Vec<FileNode>>,
    },
    /// The sync failed, could not be observed, or never finished.
    Failed(String),
}

pub fn poll_cap_message(max_polls: u32) -> String {
    format!("Git sync did not finish after {max_polls} status checks")
}

/// Owns one background poll loop. Stopping (or dropping) the poller
/// guarantees its outcome callback never runs.
#[derive(Debug)]
pub struct SyncPoller {
    cancel: CancellationToken,
}

impl SyncPoller {
    /// Begin polling `project_id` every `options.interval`. The first check
    /// happens one interval after this call.
    ///
    /// `expanded` is consulted when the sync succeeds to decide whether the
    /// file tree is worth refetching.
    pub fn spawn<F>(
        backend: Arc<dyn RagBackend>,
        project_id: ProjectId,
        options: SyncPollerOptions,
        expanded: ActiveReader<Option<ProjectId>>,
        on_outcome: F,
    ) -> Self
    where
        F: FnOnce(SyncOutcome) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let outcome =
                    poll_until_settled(backend.as_ref(), &project_id, options, &expanded, &cancel)
                        .await;
                if let Some(outcome) = outcome
                    && !cancel.is_cancelled()
                {
                    info!(%project_id, "git sync poll finished: {outcome:?}");
                    on_outcome(outcome);
                }
            }
        });
        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SyncPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Returns `None` once cancelled.
async fn poll_until_settled(
    backend: &dyn RagBackend,
    project_id: &ProjectId,
    options: SyncPollerOptions,
    expanded: &ActiveReader<Option<ProjectId>>,
    cancel: &CancellationToken,
) -> Option<SyncOutcome> {
    for attempt in 1..=options.max_polls {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(options.interval) => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            fetched = backend.get_git_config(project_id) => fetched,
        };
        if cancel.is_cancelled() {
            return None;
        }

        let config = match fetched {
            Ok(Some(config)) => config,
            Ok(None) => return Some(SyncOutcome::Stopped),
            Err(err) => {
                warn!(%project_id, "git sync status check failed: {err}");
                return Some(SyncOutcome::Failed(err.user_message()));
            }
        };

        match config.sync_status {
            Some(SyncStatus::Syncing) => {
                debug!(%project_id, attempt, "git sync still running");
            }
            None => return Some(SyncOutcome::Stopped),
            Some(SyncStatus::Error) => {
                let message = config
                    .sync_error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| SYNC_FAILED_FALLBACK.to_string());
                return Some(SyncOutcome::Failed(message));
            }
            Some(SyncStatus::Done) => {
                let files = if expanded.matches(|p| p.as_ref() == Some(project_id)) {
                    fetch_files(backend, project_id, cancel).await?
                } else {
                    None
                };
                return Some(SyncOutcome::Succeeded { config, files });
            }
        }
    }
    Some(SyncOutcome::Failed(poll_cap_message(options.max_polls)))
}

/// Outer `None` means cancelled. A failed refresh is reported as `Some(None)`
/// so the caller can reload the tree itself.
async fn fetch_files(
    backend: &dyn RagBackend,
    project_id: &ProjectId,
    cancel: &CancellationToken,
) -> Option<Option<Vec<FileNode>>> {
    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        fetched = backend.list_files(project_id) => fetched,
    };
    match fetched {
        Ok(files) => Some(Some(files)),
        Err(err) => {
            warn!(%project_id, "failed to refresh files after git sync: {err}");
            Some(None)
        }
    }
}
