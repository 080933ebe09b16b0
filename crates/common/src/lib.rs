/**
 * Reconnect schedule and sticky-fallback
 *  bookkeeping for the push stream.
 */
pub mod backoff;
/**
 * Normalized sync events and the
 *  event-stream frame decoder.
 */
pub mod event;
/**
 * Latency and check-interval history,
 *  derived from traffic that already happens.
 */
pub mod health;
/**
 * `.syftignore` matching, whitelists
 *  and the essential path list.
 */
pub mod ignore;
/**
 * Bounded activity and connection logs.
 */
pub mod ledger;
/**
 * Datasite-relative path helpers.
 */
pub mod paths;
/**
 * Daemon queue-status wire types.
 */
pub mod queue;
/**
 * Connection status and daemon state.
 */
pub mod status;
/**
 * Hierarchical sync tree: nodes, folder
 *  aggregation, sections and discovery.
 */
pub mod tree;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::backoff::{NextStep, ReconnectPolicy};
    pub use crate::event::{
        Direction, EventParseError, FileEvent, FrameDecoder, QueueSummary, StatusEvent, SyncEvent,
    };
    pub use crate::health::{HealthSampler, HealthStats};
    pub use crate::ignore::{IgnorePatterns, IgnoreRules};
    pub use crate::ledger::{
        ActivityEntry, ActivityLog, Channel, ConnectionKind, ConnectionLog, ConnectionLogEntry,
    };
    pub use crate::queue::{QueueStatus, UploadAction};
    pub use crate::status::{AuthMode, ConnectionStatus, DaemonState, PollCadence, TransportMode};
    pub use crate::tree::{
        DiscoveryFile, NodeDetails, Sections, SharedWithMeItem, SyncNode, SyncState,
        SyncTreeStore, TrustedDatasites,
    };
    pub use crate::version::build_info;
}
