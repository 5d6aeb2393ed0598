#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Facade crate wiring the Meltica gateway's components (C1-C11) into one runnable data
//! plane: [`Gateway`] owns the object pool, routing table, adapter registry, provider
//! lifecycle manager, and event bus, and wires a [`meltica_dispatcher::DispatcherRuntime`]
//! per provider the moment it starts.
//!
//! Config loading, an HTTP control surface, Postgres migrations, OpenTelemetry wiring, an
//! embedded strategy runtime, and CLI assembly all stay outside this crate. A binary embeds
//! `Gateway` and supplies a
//! [`meltica_provider::ProviderStore`], an optional [`meltica_outbox::OutboxStore`], and one
//! [`meltica_provider::InstanceFactory`] per adapter it wants to support.

pub mod error;
pub mod gateway;

pub use error::MelticaError;
pub use gateway::{Gateway, GatewayBus, GatewayConfig};

pub use meltica_bus::{EventBus, PublishOutcome, Subscription, SubscriptionId, DEFAULT_EXTENSION_CAP};
pub use meltica_core::{EventEnvelope, EventType, Payload, PoolManager};
pub use meltica_dispatcher::{DispatchStats, DispatcherRuntime};
pub use meltica_outbox::DurableBus;
pub use meltica_provider::{
    Instance, InstanceFactory, MemoryProviderStore, OrderRequest, ProviderConfig, ProviderLifecycleManager, ProviderMetadata,
    ProviderSpec, ProviderStatus, ProviderStore, Registry,
};
pub use meltica_routing::{FilterOperator, FilterRule, Route, RouteKey, RoutingTable};
