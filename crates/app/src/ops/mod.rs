pub mod ignores;
pub mod init;
pub mod ls;
pub mod status;
pub mod subscribe;
pub mod upload;
pub mod version;
pub mod watch;

pub use ignores::Ignores;
pub use init::Init;
pub use ls::Ls;
pub use status::Status;
pub use upload::Upload;
pub use version::Version;
pub use watch::Watch;

use service::control_plane::DaemonControlPlane;

use crate::state::AppState;

/// One-shot control plane for ops that do not run the engine
pub fn control_plane(state: &AppState) -> DaemonControlPlane {
    DaemonControlPlane::new(
        state.daemon_config_path(),
        state.config.data_dir.clone(),
        state.config.identity.clone(),
        service::Timings::default().request_timeout,
    )
}
