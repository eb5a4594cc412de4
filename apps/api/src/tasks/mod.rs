// Task Record Store: persisted units of asynchronous work and their state machine.
// Workers and the dispatcher only ever touch tasks through the `TaskStore` port.

pub mod lifecycle;
pub mod pg_store;
pub mod store;

pub use lifecycle::TaskUpdate;
pub use pg_store::PgTaskStore;
pub use store::{StoreError, TaskStore};
