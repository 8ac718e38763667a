//! Domain layer: packets, payload codec, log priorities and the event
//! source.
//!
//! This module contains the protocol-level model shared by every
//! service: the [`Packet`] unit of work and its outbound [`Frame`], the
//! register payload codec, and the [`EventSource`] used to decouple
//! services from their observers.

pub mod event_source;
pub mod pack;
pub mod packet;
pub mod priority;

pub use event_source::{CHANGE, ERROR, EventArg, EventSource, Handler, Subscription, handler};
pub use pack::{Packable, Value};
pub use packet::{Destination, Frame, Inbound, MAX_PAYLOAD_SIZE, Packet};
pub use priority::Priority;
