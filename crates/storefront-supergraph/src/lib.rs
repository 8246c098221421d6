//! Supergraph lifecycle for the storefront gateway.
//!
//! ## Acquisition
//!
//! A [`SupergraphSource`] owns the active [`SupergraphDescriptor`] and the
//! [`QueryExecutor`] built from it. Descriptors come either from
//! [`IntrospectAndCompose`] (static, a fixed list of subgraph endpoints) or
//! from a [`RegistryFetcher`] (dynamic, raw SDL served over HTTP). A new
//! descriptor replaces the active one wholesale; queries already running
//! keep the executor they started with.
//!
//! ## Execution
//!
//! The default [`RoutingExecutorFactory`] reads subgraph endpoints and
//! root-field ownership from the supergraph SDL and forwards each operation
//! to the one subgraph that owns it. Every outbound call passes through the
//! [`SubgraphRequestHook`] chain; [`SessionBridge`] is the hook that forwards
//! the caller's cookie and session payload.

pub mod bridge;
pub mod compose;
pub mod datasource;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod operation;
pub mod routing;
pub mod source;

pub use bridge::{SessionBridge, X_SESSION_DATA_HEADER};
pub use compose::{IntrospectAndCompose, compose_routing_sdl};
pub use datasource::{
    OperationContext, RemoteSubgraph, RequestIdPropagation, SubgraphRequest, SubgraphRequestHook,
    X_REQUEST_ID_HEADER,
};
pub use descriptor::SupergraphDescriptor;
pub use error::SupergraphError;
pub use executor::{ExecutorFactory, QueryExecutor, RoutingExecutor, RoutingExecutorFactory};
pub use fetch::RegistryFetcher;
pub use operation::{
    GraphQLError, GraphQLRequest, GraphQLResponse, Operation, OperationError, OperationKind,
    RootField, error_codes,
};
pub use routing::{RoutePlan, RoutingTable, SubgraphEndpoint};
pub use source::{
    ActiveSupergraph, DEFAULT_FETCH_TIMEOUT, DEFAULT_POLL_INTERVAL, ReloadStatus, SourceMode,
    SourcePhase, SupergraphSource,
};
