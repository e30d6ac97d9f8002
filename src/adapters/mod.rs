//! Adapters to the systems the reconciler talks to: storage backends, the
//! backend registry and the bucket record store

mod backends_config;
mod memory;
mod record_store;
mod registry;
mod storage;

pub use backends_config::*;
pub use memory::*;
pub use record_store::*;
pub use registry::*;
pub use storage::*;
