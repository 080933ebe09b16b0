use service::control_plane::requests::SubscribeRequest;
use service::control_plane::{ControlPlane, ControlPlaneError};

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error(transparent)]
    State(#[from] crate::state::StateError),
    #[error("subscribe failed: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

#[async_trait::async_trait]
impl crate::op::Op for SubscribeRequest {
    type Error = SubscribeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.load_state()?;
        let cp = super::control_plane(&state);

        let path = common::paths::normalize(&self.path);
        let path = path.trim_end_matches('/');
        cp.subscribe(path, self.is_folder).await?;
        cp.trigger_sync().await?;

        let kind = if self.is_folder { "folder" } else { "file" };
        Ok(format!("Subscribed to {} {}", kind, path))
    }
}
