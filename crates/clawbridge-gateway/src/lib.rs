//! Bridging engine for clawbridge.
//!
//! One persistent link to an upstream gateway, fanned out to any number of
//! downstream WebSocket clients:
//! - request/response correlation with timeouts
//! - upstream link lifecycle with fixed-delay reconnection
//! - event routing and streamed-reply reassembly
//! - a broadcast hub for downstream clients

pub mod correlator;
pub mod error;
pub mod extract;
pub mod hub;
pub mod link;
pub mod protocol;
pub mod reassembler;
pub mod router;
pub mod server;

pub use correlator::{Correlator, PendingReply};
pub use error::BridgeError;
pub use hub::Hub;
pub use link::{
    Connector, LinkOptions, LinkPhase, LinkSnapshot, LinkState, Transport, UpstreamLink, WsConnector,
};
pub use protocol::{ClientCommand, InboundFrame, ServerMessage, StreamState, ToolPhase};
pub use reassembler::StreamReassembler;
pub use router::EventRouter;
pub use server::Bridge;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
