// Re-export modules for testing and external use
pub mod api {
    pub mod client;

    pub use client::{ApiError, CentralManagerClient, RemoteApi, RequestBody};
}

pub mod resource {
    pub mod definitions;
    pub mod mapping;
    pub mod model;
    pub mod schema;
    pub mod store;
    pub mod synchronizer;

    pub use definitions::ResourceDefinition;
    pub use model::{DesiredConfig, ObservedState, PlanAction, ResourceIdentity, ResourceKind};
    pub use store::{ConfigStore, JsonFileStore, MemoryStore};
    pub use synchronizer::{Action, ApplyOutcome, SyncError, Synchronizer};
}

pub mod shared {
    pub mod logging;
    pub mod record;
}

pub mod config;

// Re-export commonly used types for easier testing and external use
pub use api::client::CentralManagerClient;
pub use resource::synchronizer::{SyncError, Synchronizer};
