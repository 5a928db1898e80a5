//! gRPC message types and clients.
//!
//! The messages are maintained by hand with `prost` derives so the build does
//! not depend on `protoc`. The matching `.proto` sources live in `proto/` at
//! the repository root.

pub mod events;
pub mod vizier;

pub use events::event_gateway_service_client::EventGatewayServiceClient;
pub use events::{KubernetesContext, PixieEvent, StreamEventsResponse};
pub use vizier::vizier_service_client::VizierServiceClient;
pub use vizier::{ExecuteScriptRequest, ExecuteScriptResponse};
