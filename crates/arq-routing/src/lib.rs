// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! arq-routing
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Client identity, activity, and fan-out writes.
pub mod clients;
/// Result collection and selection futures for competing dispatch.
pub mod collector;
/// Capability routing strategies.
pub mod dispatcher;
/// Operator capability groups.
pub mod operators;
/// Room and channel structure.
pub mod rooms;
/// Join/leave and message routing glue.
pub mod router;

pub use clients::{ClientInfo, ClientRegistry, OutboundFrame};
pub use collector::{ResultCollector, SelectionFuture, SelectionResolution, default_selection};
pub use dispatcher::{DirectRouter, DispatchStrategy, TaskDispatcher};
pub use operators::{OperatorAuthPolicy, OperatorRegistry};
pub use rooms::{ChannelManager, RoomManager};
pub use router::{MessageRouter, RoutingCoordinator};

use arq_core::Envelope;
use arq_wire::{JsonCodec, WireError, WireFormat, encode_binary};

/// Encode an envelope into an outbound frame in the given wire format.
///
/// # Errors
///
/// Propagates codec failures.
pub fn encode_frame(envelope: &Envelope, format: WireFormat) -> Result<OutboundFrame, WireError> {
    match format {
        WireFormat::Json => Ok(OutboundFrame::Text(JsonCodec::encode(envelope)?)),
        WireFormat::Protobuf => Ok(OutboundFrame::Binary(encode_binary(envelope)?)),
    }
}
