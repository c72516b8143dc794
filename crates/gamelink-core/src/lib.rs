//! Shared building blocks for the gamelink bridge.
//!
//! Everything that both the network side and the game side need to agree on
//! lives here: the wire envelope, error codes, the handler capability
//! contract, sender descriptors, event sinks and the tick executor seam.

pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod module;
pub mod params;
pub mod sender;
pub mod tick;

pub use envelope::{DecodeError, Envelope, EnvelopeType, Payload, PROTOCOL_VERSION};
pub use errors::OpError;
pub use events::{EventSink, EventSlot};
pub use module::{Completion, OpModule, Outcome};
pub use sender::{CommandSource, SenderDescriptor};
pub use tick::{run_on_tick, TickExecutor, TickLoop};
