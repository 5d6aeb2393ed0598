#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Provider lifecycle manager and adapter registry for the Meltica gateway (components C9,
//! C11).

mod config;
mod error;
mod instance;
mod lifecycle;
mod registry;
mod spec;
mod store;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use instance::{Instance, InstanceFactory, OrderRequest};
pub use lifecycle::{ProviderLifecycleManager, ProviderMetadata, ProviderStatus};
pub use registry::Registry;
pub use spec::ProviderSpec;
pub use store::{MemoryProviderStore, ProviderSnapshot, ProviderStore};
