// Process module - server registry, spawning and supervision

pub mod registry;
pub mod spawner;
pub mod supervisor;
mod types;

pub use registry::{ExitOutcome, ProcessRegistry};
pub use spawner::{spawn_server, SpawnedProcess};
pub use supervisor::{ProcessSupervisor, ServerRecord, SERVERS_KEY};
pub use types::{
    LifecycleOrigin, ManagedServer, ProcessAttachment, RestartReason, ServerId, ServerInfo,
    ServerStatus,
};
