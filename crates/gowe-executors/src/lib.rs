//! Executor backends and the registry that routes Tasks to them
//! (spec §4.5), grounded on `durable::activity`/`durable::engine::registry`.

pub mod bvbrc;
pub mod container;
pub mod local;
pub mod registry;
pub mod worker_executor;

pub mod prelude {
    pub use crate::bvbrc::BvbrcExecutor;
    pub use crate::container::ContainerExecutor;
    pub use crate::local::LocalExecutor;
    pub use crate::registry::{NoBackendRegistered, Registry};
    pub use crate::worker_executor::WorkerExecutor;
}
