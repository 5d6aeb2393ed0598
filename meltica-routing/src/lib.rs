#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Routing table and subscription reconciliation for the Meltica gateway (components C3, C8).

pub mod error;
pub mod filter;
pub mod route;
pub mod subscription;
pub mod table;

pub use error::RoutingError;
pub use filter::FilterDelta;
pub use route::{FilterOperator, FilterRule, RestPollDescriptor, Route, RouteKey};
pub use subscription::{ReconcileOutcome, RouteAdapter, SubscriptionManager};
pub use table::RoutingTable;
