//! Service layer: the dispatch contract and the concrete services.
//!
//! Every service embeds a [`ServiceCore`] (identity, lifecycle flag,
//! outbound path, local [`EventSource`]) and implements [`Service`],
//! routing each inbound [`Packet`] by exact command match.
//!
//! ```text
//! Inbound ──► Node ──► Service::dispatch ──► handle_packet
//!                          │ (stopped: Ignored)    │
//!                          │                       ├─ register get/set
//!                          │                       ├─ service commands
//!                          │                       └─ unknown: PossiblyNotImplemented
//!                          ▼
//!                   ServiceCore::send_report ──► Bus
//! ```

pub mod logger;
pub mod settings;

use std::fmt;
use std::sync::Arc;

use crate::domain::packet::{SYSTEM_EVENT_CHANGE, event_command, is_read_only_register};
use crate::domain::{CHANGE, EventArg, EventSource, Frame, Packable, Packet};
use crate::error::{ListenerError, NodeError};
use crate::host::Bus;

pub use logger::LoggerService;
pub use proto_test::ProtoTestService;
pub use settings::SettingsService;

/// Outcome of dispatching one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The packet matched a register or command.
    Handled,
    /// The service is stopped (or unknown) and did nothing.
    Ignored,
    /// No register or command matched; the transport may answer with
    /// a standard not-implemented report.
    PossiblyNotImplemented,
}

/// Result of offering a packet to [`ServiceCore::handle_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOp {
    /// The packet is not a get/set of this register.
    Unmatched,
    /// A get; the current value was reported.
    Get,
    /// A set; the value was replaced.
    Set,
    /// A set that was refused (read-only register or malformed payload).
    Rejected,
}

impl RegisterOp {
    /// Returns `true` unless the packet did not target this register.
    #[must_use]
    pub const fn is_handled(self) -> bool {
        !matches!(self, Self::Unmatched)
    }
}

/// State and plumbing shared by every service.
#[derive(Debug)]
pub struct ServiceCore {
    service_class: u32,
    service_index: u8,
    running: bool,
    bus: Arc<dyn Bus>,
    events: EventSource,
    event_counter: u16,
}

impl ServiceCore {
    /// Creates a stopped, unattached core for `service_class`.
    #[must_use]
    pub fn new(service_class: u32, bus: Arc<dyn Bus>) -> Self {
        Self {
            service_class,
            service_index: 0,
            running: false,
            bus,
            events: EventSource::new(),
            event_counter: 0,
        }
    }

    /// Service class identifier.
    #[must_use]
    pub const fn service_class(&self) -> u32 {
        self.service_class
    }

    /// Index of this instance on its node (0 until attached).
    #[must_use]
    pub const fn service_index(&self) -> u8 {
        self.service_index
    }

    /// Assigns the service index. Called by the node.
    pub fn attach(&mut self, service_index: u8) {
        self.service_index = service_index;
    }

    /// Returns `true` while the bus layer has the service running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Starts or stops the service. Owned by the bus layer.
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Transport this service reports to.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Local observers of this service.
    #[must_use]
    pub fn events(&self) -> &EventSource {
        &self.events
    }

    /// Returns `true` if outbound packets would currently be sent.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.running && self.bus.is_running()
    }

    /// Sends `packet` as a report of this service. Silently dropped
    /// unless [`Self::can_send`].
    pub fn send_report(&self, packet: Packet) {
        if self.can_send() {
            self.bus.send(Frame::report(self.service_index, packet));
        }
    }

    /// Sends a bus event with `code` and `data`.
    pub fn send_event(&mut self, code: u8, data: Vec<u8>) {
        if !self.can_send() {
            return;
        }
        let command = event_command(code, self.event_counter);
        self.event_counter = self.event_counter.wrapping_add(1);
        self.send_report(Packet::new(command, data));
    }

    /// Announces a state change on the bus and to local observers.
    ///
    /// # Errors
    ///
    /// Propagates a handler failure when no `"error"` listener is
    /// registered on [`Self::events`].
    pub fn send_change_event(&mut self) -> Result<(), ListenerError> {
        self.send_event(SYSTEM_EVENT_CHANGE, Vec::new());
        self.events.emit(CHANGE, &EventArg::Empty)?;
        Ok(())
    }

    /// Serves a get or set of `register` whose payload uses `format`.
    ///
    /// A get reports `value` back with the request's command. A set
    /// decodes the payload into `value`, unless the register is in the
    /// read-only block or the payload does not decode.
    pub fn handle_register<T: Packable>(
        &self,
        packet: &Packet,
        register: u16,
        format: &str,
        value: &mut T,
    ) -> RegisterOp {
        if !(packet.is_reg_get() || packet.is_reg_set()) || packet.reg_code() != register {
            return RegisterOp::Unmatched;
        }

        if packet.is_reg_get() {
            match Packet::packed_as(packet.service_command(), format, value) {
                Ok(report) => self.send_report(report),
                Err(err) => tracing::warn!(register, error = %err, "register value does not encode"),
            }
            return RegisterOp::Get;
        }

        if is_read_only_register(register) {
            tracing::debug!(register, "set of read-only register refused");
            return RegisterOp::Rejected;
        }
        match packet.unpack_as::<T>(format) {
            Ok(decoded) => {
                *value = decoded;
                RegisterOp::Set
            }
            Err(err) => {
                tracing::debug!(register, error = %err, "malformed register payload");
                RegisterOp::Rejected
            }
        }
    }
}

/// A logical peripheral hosted by the node.
///
/// Implementations route by exact command match and must leave unknown
/// commands as [`Disposition::PossiblyNotImplemented`].
pub trait Service: fmt::Debug + Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Shared service state.
    fn core(&self) -> &ServiceCore;

    /// Shared service state, mutably.
    fn core_mut(&mut self) -> &mut ServiceCore;

    /// Handles one packet addressed to this service.
    ///
    /// # Errors
    ///
    /// Returns a [`NodeError`] when a local event handler fails and no
    /// `"error"` listener absorbed it.
    fn handle_packet(&mut self, packet: &Packet) -> Result<Disposition, NodeError>;

    /// Service class identifier.
    fn service_class(&self) -> u32 {
        self.core().service_class()
    }

    /// Handles `packet` if the service is running; otherwise does nothing.
    ///
    /// # Errors
    ///
    /// See [`Self::handle_packet`].
    fn dispatch(&mut self, packet: &Packet) -> Result<Disposition, NodeError> {
        if !self.core().is_running() {
            return Ok(Disposition::Ignored);
        }
        self.handle_packet(packet)
    }
}
