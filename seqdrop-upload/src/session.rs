//! One upload attempt: acquire parameters, transfer, confirm.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use seqdrop_types::{ApiToken, UploadParameters};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, StorageError, UploadError};
use crate::progress::ProgressTracker;
use crate::service::ServiceClient;
use crate::storage::StoreConnector;
use crate::transfer::{self, TransferPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ParamsRequested,
    ParamsAcquired,
    Transferring,
    Completed,
    Failed,
    Confirmed,
    ConfirmFailed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Failed | SessionState::Confirmed | SessionState::ConfirmFailed
        )
    }
}

#[derive(Debug)]
pub enum UploadResult {
    Success,
    Failed(UploadError),
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success)
    }

    /// Text suitable for showing to the user.
    pub fn message(&self) -> String {
        match self {
            UploadResult::Success => "Upload complete".to_string(),
            UploadResult::Failed(e) => e.to_string(),
        }
    }
}

/// Notifications from a spawned session. `Finished` is always the last one.
#[derive(Debug)]
pub enum UploadEvent {
    Progress(f64),
    Finished(UploadResult),
}

pub struct UploadSession {
    service: ServiceClient,
    connector: Arc<dyn StoreConnector>,
    diagnostics: Arc<Diagnostics>,
    part_size: u64,
    progress_steps: u32,
    state: SessionState,
}

impl UploadSession {
    pub fn new(
        service: ServiceClient,
        connector: Arc<dyn StoreConnector>,
        diagnostics: Arc<Diagnostics>,
        config: &Config,
    ) -> Self {
        Self {
            service,
            connector,
            diagnostics,
            part_size: config.part_size,
            progress_steps: config.progress_steps,
            state: SessionState::Idle,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_progress_steps(mut self, steps: u32) -> Self {
        self.progress_steps = steps;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Upload `path` with the caller's API token.
    ///
    /// Never retries. A failed attempt has to be started over, since the
    /// storage credentials handed out by the service are single use.
    pub async fn run(
        &mut self,
        path: &Path,
        token: &ApiToken,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(f64) + Send,
    ) -> UploadResult {
        self.state = SessionState::Idle;
        let span = tracing::info_span!("upload", attempt = %Uuid::new_v4());

        let outcome = self
            .attempt(path, token, cancel, &mut on_progress)
            .instrument(span)
            .await;

        match outcome {
            Ok(()) => UploadResult::Success,
            Err(e) => {
                self.transition(e.terminal_state());
                self.diagnostics.capture_message(&format!("{}: {:?}", e, e));
                UploadResult::Failed(e)
            }
        }
    }

    /// Run the session on its own task. The caller drives it through the
    /// returned handle.
    pub fn spawn(mut self, path: PathBuf, token: ApiToken) -> UploadHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let progress_tx = tx.clone();
            let result = self
                .run(&path, &token, &task_cancel, move |fraction| {
                    let _ = progress_tx.send(UploadEvent::Progress(fraction));
                })
                .await;
            let _ = tx.send(UploadEvent::Finished(result));
            self.state
        });

        UploadHandle {
            events,
            cancel,
            task,
        }
    }

    async fn attempt(
        &mut self,
        path: &Path,
        token: &ApiToken,
        cancel: &CancellationToken,
        on_progress: &mut (impl FnMut(f64) + Send),
    ) -> Result<()> {
        self.transition(SessionState::ParamsRequested);
        let params = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            params = self.service.init_multipart_upload(token) => {
                params.map_err(UploadError::ParameterAcquisition)?
            }
        };
        self.transition(SessionState::ParamsAcquired);

        self.transfer(path, &params, cancel, on_progress).await?;
        self.transition(SessionState::Completed);

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.service
            .confirm_upload(token, &params, &filename)
            .await
            .map_err(UploadError::Confirmation)?;
        self.transition(SessionState::Confirmed);
        tracing::info!("upload of {} confirmed as {}", filename, params.s3_path());
        Ok(())
    }

    async fn transfer(
        &mut self,
        path: &Path,
        params: &UploadParameters,
        cancel: &CancellationToken,
        on_progress: &mut (impl FnMut(f64) + Send),
    ) -> std::result::Result<(), StorageError> {
        let file_size = tokio::fs::metadata(path).await?.len();
        let store = self.connector.connect(params)?;
        let plan = TransferPlan::new(file_size, self.part_size);

        self.transition(SessionState::Transferring);
        self.diagnostics.breadcrumb(format!(
            "transferring {} bytes in {} part(s)",
            file_size,
            plan.part_count()
        ));

        let mut tracker = ProgressTracker::new(file_size, self.progress_steps);
        transfer::upload_file(
            store.as_ref(),
            path,
            &params.bucket,
            &params.file_id,
            plan,
            cancel,
            |bytes| {
                if let Some(fraction) = tracker.observe(bytes) {
                    on_progress(fraction);
                }
            },
        )
        .await
    }

    fn transition(&mut self, next: SessionState) {
        tracing::info!("upload state {:?} -> {:?}", self.state, next);
        self.diagnostics.breadcrumb(format!("upload state: {:?}", next));
        self.state = next;
    }
}

/// Caller's side of a spawned [`UploadSession`].
pub struct UploadHandle {
    events: mpsc::UnboundedReceiver<UploadEvent>,
    cancel: CancellationToken,
    task: JoinHandle<SessionState>,
}

impl UploadHandle {
    /// Ask the session to stop. Parameter acquisition and the transfer are
    /// interrupted; a confirmation already in flight runs to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Terminate the worker task outright. No abort is sent to the store, so
    /// parts already uploaded are left for the bucket's lifecycle policy.
    pub fn kill(&self) {
        self.task.abort();
    }

    /// Next notification, or `None` once the session has finished and all
    /// events were drained.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events.recv().await
    }

    /// Wait for the session and return the state it ended in.
    pub async fn join(self) -> std::result::Result<SessionState, JoinError> {
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Confirmed.is_terminal());
        assert!(SessionState::ConfirmFailed.is_terminal());
    }

    #[test]
    fn test_failure_messages_are_distinct() {
        let transfer = UploadResult::Failed(UploadError::Transfer(StorageError::Request(
            "boom".to_string(),
        )));
        let confirm = UploadResult::Failed(UploadError::Confirmation(ServiceError::Protocol(
            "boom".to_string(),
        )));
        assert_ne!(transfer.message(), confirm.message());
        assert_eq!(
            confirm.message(),
            "upload confirmation has failed; contact support if this persists"
        );
        assert!(UploadResult::Success.is_success());
    }
}
