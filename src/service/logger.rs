//! Logger service: streams log lines to remote listeners.
//!
//! Listeners advertise the lowest priority they want by writing the
//! `min_priority` register. Several listeners share one register, so a
//! request to *raise* the threshold is only honoured once the listener
//! that last lowered it has been quiet for [`LISTENER_COOLDOWN_MS`].
//! Lowering is always accepted. If no listener has re-asserted its
//! preference within [`LISTENER_EXPIRY_MS`], the service falls back to
//! [`Priority::Silent`] and stops sending.

use std::sync::Arc;

use crate::domain::packet::CMD_SET_REG;
use crate::domain::{Packet, Priority};
use crate::error::NodeError;
use crate::host::{Bus, Clock, ConsoleThreshold};

use super::{Disposition, RegisterOp, Service, ServiceCore};

/// Service class of the logger.
pub const SRV_LOGGER: u32 = 0x12dc_1fca;

/// Register holding the minimum priority (`u8`).
pub const REG_MIN_PRIORITY: u16 = 0x80;

/// Report command of a debug line; other priorities follow in order.
pub const CMD_DEBUG: u16 = 0x80;

/// A listener must be quiet this long before the threshold may rise.
pub const LISTENER_COOLDOWN_MS: u64 = 1500;

/// Without a fresh request for this long, listeners are assumed gone.
pub const LISTENER_EXPIRY_MS: u64 = 3000;

const MIN_PRIORITY_FORMAT: &str = "u8";

// A UTF-8 scalar is at most 4 bytes; chunking needs room for one.
const MIN_CHUNK: usize = 4;

/// Logger service state.
#[derive(Debug)]
pub struct LoggerService {
    core: ServiceCore,
    clock: Arc<dyn Clock>,
    console: Arc<dyn ConsoleThreshold>,
    min_priority: Priority,
    last_listener_time: u64,
}

impl LoggerService {
    /// Creates a logger with no listeners (threshold `Silent`).
    #[must_use]
    pub fn new(
        bus: Arc<dyn Bus>,
        clock: Arc<dyn Clock>,
        console: Arc<dyn ConsoleThreshold>,
    ) -> Self {
        Self {
            core: ServiceCore::new(SRV_LOGGER, bus),
            clock,
            console,
            min_priority: Priority::Silent,
            last_listener_time: 0,
        }
    }

    /// Current threshold.
    #[must_use]
    pub const fn min_priority(&self) -> Priority {
        self.min_priority
    }

    /// Time of the last accepted listener request, or 0 if none.
    #[must_use]
    pub const fn last_listener_time(&self) -> u64 {
        self.last_listener_time
    }

    /// Applies a listener's threshold request. Returns whether it was
    /// accepted.
    ///
    /// The local console is then lowered to the resulting threshold, so
    /// it never filters out what remote listeners asked for.
    pub fn set_min_priority(&mut self, requested: Priority) -> bool {
        let now = self.clock.millis();
        let quiet_for = now.saturating_sub(self.last_listener_time);
        let accepted = requested <= self.min_priority || quiet_for > LISTENER_COOLDOWN_MS;
        if accepted {
            tracing::debug!(from = %self.min_priority, to = %requested, "logger threshold changed");
            self.min_priority = requested;
            // 0 means "no listener"
            self.last_listener_time = now.max(1);
        } else {
            tracing::debug!(current = %self.min_priority, %requested, quiet_for, "threshold raise refused");
        }
        self.console.lower_min_priority(self.min_priority);
        accepted
    }

    /// Sends `message` at `priority` to listeners, split into
    /// payload-sized chunks on character boundaries. Returns the number
    /// of reports sent.
    pub fn add(&mut self, priority: Priority, message: &str) -> usize {
        if !self.core.can_send() || message.is_empty() || priority == Priority::Silent {
            return 0;
        }
        if priority < self.min_priority || self.last_listener_time == 0 {
            return 0;
        }
        if self.clock.millis().saturating_sub(self.last_listener_time) > LISTENER_EXPIRY_MS {
            tracing::debug!("logger listeners expired");
            self.last_listener_time = 0;
            self.min_priority = Priority::Silent;
            return 0;
        }

        let command = CMD_DEBUG + u16::from(priority.as_u8());
        let chunks = utf8_chunks(message, self.core.bus().max_payload_size());
        let sent = chunks.len();
        for chunk in chunks {
            self.core
                .send_report(Packet::new(command, chunk.as_bytes().to_vec()));
        }
        sent
    }

    /// Sends a debug line.
    pub fn debug(&mut self, message: &str) -> usize {
        self.add(Priority::Debug, message)
    }

    /// Sends a log line.
    pub fn log(&mut self, message: &str) -> usize {
        self.add(Priority::Log, message)
    }

    /// Sends a warning.
    pub fn warn(&mut self, message: &str) -> usize {
        self.add(Priority::Warning, message)
    }

    /// Sends an error line.
    pub fn error(&mut self, message: &str) -> usize {
        self.add(Priority::Error, message)
    }
}

impl Service for LoggerService {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ServiceCore {
        &mut self.core
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<Disposition, NodeError> {
        if packet.service_command() == CMD_SET_REG | REG_MIN_PRIORITY {
            match packet.unpack_as::<u8>(MIN_PRIORITY_FORMAT) {
                Ok(raw) => {
                    self.set_min_priority(Priority::from_wire(raw));
                }
                Err(err) => tracing::debug!(error = %err, "malformed min_priority write"),
            }
            return Ok(Disposition::Handled);
        }

        let mut current = self.min_priority.as_u8();
        match self
            .core
            .handle_register(packet, REG_MIN_PRIORITY, MIN_PRIORITY_FORMAT, &mut current)
        {
            RegisterOp::Unmatched => Ok(Disposition::PossiblyNotImplemented),
            RegisterOp::Get | RegisterOp::Set | RegisterOp::Rejected => Ok(Disposition::Handled),
        }
    }
}

/// Splits `message` into pieces of at most `max_bytes` bytes, never
/// cutting a character in two.
fn utf8_chunks(message: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(MIN_CHUNK);
    let mut chunks = Vec::new();
    let mut rest = message;
    while !rest.is_empty() {
        let mut end = rest.len().min(max_bytes);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}
