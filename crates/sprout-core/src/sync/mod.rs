//! Synchronization between the local store and the remote backend.

mod engine;
pub(crate) mod gateway;
pub(crate) mod resolver;

pub use engine::{SyncEngine, SyncOptions, MAX_RETRY};
pub use gateway::{
    GatewayCall, GatewayOptions, LessonDocument, MockRemoteGateway, ProgressDocument,
    RemoteGateway, RemoteProgress, UserDocument, SIMULATED_FAILURE_PERCENT,
    SIMULATED_NETWORK_DELAY_MS,
};
pub use resolver::resolve_last_write;
