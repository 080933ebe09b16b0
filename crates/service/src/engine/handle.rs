use tokio::sync::{broadcast, oneshot, watch};

use common::event::StatusEvent;
use common::ignore::IgnorePatterns;
use common::queue::UploadAction;
use common::tree::{NodeDetails, SharedWithMeItem, SyncNode};

use super::{Command, EngineError, EngineMsg, Snapshot};
use crate::reconciler::RenderRequest;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Cheap, cloneable front door to a running [`super::Engine`].
///
/// Every method only sends a message; the engine does the work on its own
/// task and answers over a oneshot channel.
#[derive(Clone)]
pub struct EngineHandle {
    tx: flume::Sender<EngineMsg>,
    snapshots: watch::Receiver<Snapshot>,
    renders: broadcast::Sender<RenderRequest>,
}

impl EngineHandle {
    pub(crate) fn new(
        tx: flume::Sender<EngineMsg>,
        snapshots: watch::Receiver<Snapshot>,
        renders: broadcast::Sender<RenderRequest>,
    ) -> Self {
        Self {
            tx,
            snapshots,
            renders,
        }
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.tx
            .send_async(EngineMsg::Command(command))
            .await
            .map_err(|_| EngineError::Closed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| EngineError::Dropped)?
    }

    /// Flip the ignore flag of `path` and persist it through the control
    /// plane. Resolves once the control plane answered.
    pub async fn toggle_ignore(&self, path: impl Into<String>) -> Result<(), EngineError> {
        let path = path.into();
        self.request(|reply| Command::ToggleIgnore { path, reply }).await
    }

    /// List the children of `path` (the datasite roots for `None`) and merge
    /// them into the tree. The returned nodes carry live state.
    pub async fn list_dir(&self, path: Option<String>) -> Result<Vec<SyncNode>, EngineError> {
        self.request(|reply| Command::ListDir { path, reply }).await
    }

    /// Subscribe to a path from the discovery listing
    pub async fn subscribe_path(
        &self,
        path: impl Into<String>,
        is_folder: bool,
    ) -> Result<(), EngineError> {
        let path = path.into();
        self.request(|reply| Command::Subscribe {
            path,
            is_folder,
            reply,
        })
        .await
    }

    pub async fn refresh_discovery(&self) -> Result<(), EngineError> {
        self.send(Command::RefreshDiscovery).await
    }

    pub async fn details(&self, path: impl Into<String>) -> Result<NodeDetails, EngineError> {
        let path = path.into();
        self.request(|reply| Command::Details { path, reply }).await
    }

    pub async fn shared_with_me(&self) -> Result<Vec<SharedWithMeItem>, EngineError> {
        self.request(|reply| Command::SharedWithMe { reply }).await
    }

    pub async fn subscribe_shared(&self, path: impl Into<String>) -> Result<(), EngineError> {
        let path = path.into();
        self.request(|reply| Command::SubscribeShared { path, reply }).await
    }

    pub async fn unsubscribe_shared(&self, path: impl Into<String>) -> Result<(), EngineError> {
        let path = path.into();
        self.request(|reply| Command::UnsubscribeShared { path, reply })
            .await
    }

    pub async fn ignore_patterns(&self) -> Result<IgnorePatterns, EngineError> {
        self.request(|reply| Command::IgnorePatterns { reply }).await
    }

    /// Pause, resume, restart or cancel an upload. Resolves after the queue
    /// was re-read and applied, so the activity log already shows the change.
    pub async fn upload_action(
        &self,
        id: impl Into<String>,
        action: UploadAction,
    ) -> Result<(), EngineError> {
        let id = id.into();
        self.request(|reply| Command::UploadAction { id, action, reply })
            .await
    }

    /// Feed a socket-status bridge notification
    pub async fn socket_status(&self, status: StatusEvent) -> Result<(), EngineError> {
        self.send(Command::SocketStatus(status)).await
    }

    pub async fn set_trusted(&self, identities: Vec<String>) -> Result<(), EngineError> {
        self.send(Command::SetTrusted(identities)).await
    }

    /// Probe the stream endpoint now, ignoring the probe rate limit
    pub async fn probe_now(&self) -> Result<(), EngineError> {
        self.send(Command::ProbeNow).await
    }

    /// A fresh snapshot taken by the engine
    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| EngineError::Dropped)
    }

    /// The last published snapshot, without a round trip
    pub fn latest(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_renders(&self) -> broadcast::Receiver<RenderRequest> {
        self.renders.subscribe()
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(Command::Shutdown).await
    }
}
