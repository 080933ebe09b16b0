use clap::Args;

use common::queue::UploadAction;
use service::control_plane::{ControlPlane, ControlPlaneError};

#[derive(Args, Debug, Clone)]
pub struct Upload {
    /// Upload id as shown by the daemon's upload queue
    pub id: String,

    /// pause, resume, restart or cancel
    pub action: UploadAction,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    State(#[from] crate::state::StateError),
    #[error("upload action failed: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

#[async_trait::async_trait]
impl crate::op::Op for Upload {
    type Error = UploadError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.load_state()?;
        let cp = super::control_plane(&state);
        cp.upload_action(&self.id, self.action).await?;

        // show where the upload ended up
        let queue = cp.queue_status().await?;
        let current = queue
            .uploads
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|u| u.id == self.id)
            .map(|u| format!(" (now {}, {:.0}%)", u.state, u.progress));
        Ok(format!(
            "Upload {}: {}{}",
            self.id,
            self.action,
            current.unwrap_or_default()
        ))
    }
}
