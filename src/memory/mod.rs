//! 记忆层：空间记忆（地点、资源、危险格、卡住检测）与快照持久化

pub mod persistence;
pub mod spatial;

pub use persistence::{
    create_store, AgentSnapshot, JsonFileStore, NoopStore, SnapshotStore, SqliteStore, StoreError,
};
pub use spatial::{MemoryData, NamedLocation, ResourceSighting, SpatialMemory, Stats, Zone};
