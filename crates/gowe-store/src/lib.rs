//! Persistence layer for GoWe: the `Store` trait plus `InMemoryStore` and
//! `PostgresStore` implementations, mirroring
//! `everruns-durable::persistence`'s split of trait/memory/postgres
//! modules.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub mod prelude {
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::memory::InMemoryStore;
    pub use crate::postgres::PostgresStore;
    pub use crate::store::{ClaimedTask, Store};
}
