//! Service packets and outbound frames.
//!
//! A [`Packet`] is the unit of work a service sees: a 16-bit service
//! command plus payload bytes. Framing, CRC and addressing belong to the
//! transport; the only addressing kept here is what a service needs to
//! direct its output ([`Destination`]).

use super::pack::{self, Packable, Value};
use crate::error::CodecError;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = 236;

/// Command bits selecting a register read.
pub const CMD_GET_REG: u16 = 0x1000;
/// Command bits selecting a register write.
pub const CMD_SET_REG: u16 = 0x2000;
/// Mask of the get/set selector.
pub const CMD_TYPE_MASK: u16 = 0xf000;
/// Mask of the register code inside a get/set command.
pub const CMD_REG_MASK: u16 = 0x0fff;
/// Registers in `0x100..=0x1ff` are read-only.
pub const REG_READ_ONLY_BLOCK: u16 = 0x1;

/// Marks an event packet.
pub const CMD_EVENT_MASK: u16 = 0x8000;
/// Event code bits.
pub const CMD_EVENT_CODE_MASK: u16 = 0x00ff;
/// Event counter bits (before shifting).
pub const CMD_EVENT_COUNTER_MASK: u16 = 0x007f;
/// Position of the event counter.
pub const CMD_EVENT_COUNTER_POS: u16 = 8;

/// System event raised after a service state change.
pub const SYSTEM_EVENT_CHANGE: u8 = 0x03;

/// Service index that receives pipe data on the target device.
pub const PIPE_SERVICE_INDEX: u8 = 0x3e;
/// Shift of the pipe port inside a pipe command.
pub const PIPE_PORT_SHIFT: u16 = 7;
/// Pipe packet counter bits.
pub const PIPE_COUNTER_MASK: u16 = 0x001f;
/// Set on the last packet of a pipe.
pub const PIPE_CLOSE_MASK: u16 = 0x0020;

/// A command or report addressed to one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    service_command: u16,
    data: Vec<u8>,
}

impl Packet {
    /// Creates a packet with the given command and payload.
    #[must_use]
    pub const fn new(service_command: u16, data: Vec<u8>) -> Self {
        Self {
            service_command,
            data,
        }
    }

    /// Creates a packet with an empty payload.
    #[must_use]
    pub const fn from_command(service_command: u16) -> Self {
        Self::new(service_command, Vec::new())
    }

    /// Creates a packet whose payload is `values` encoded with `format`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the values do not match `format`.
    pub fn packed(service_command: u16, format: &str, values: &[Value]) -> Result<Self, CodecError> {
        Ok(Self::new(service_command, pack::pack(format, values)?))
    }

    /// Creates a packet whose payload is a [`Packable`] value.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the value does not match `format`.
    pub fn packed_as<T: Packable>(
        service_command: u16,
        format: &str,
        value: &T,
    ) -> Result<Self, CodecError> {
        Ok(Self::new(service_command, pack::pack_as(format, value)?))
    }

    /// Returns the service command.
    #[must_use]
    pub const fn service_command(&self) -> u16 {
        self.service_command
    }

    /// Returns the payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the packet, returning its payload.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Decodes the payload with `format`.
    ///
    /// # Errors
    ///
    /// See [`pack::unpack`].
    pub fn unpack(&self, format: &str) -> Result<Vec<Value>, CodecError> {
        pack::unpack(format, &self.data)
    }

    /// Decodes the payload into a [`Packable`] value.
    ///
    /// # Errors
    ///
    /// See [`pack::unpack_as`].
    pub fn unpack_as<T: Packable>(&self, format: &str) -> Result<T, CodecError> {
        pack::unpack_as(format, &self.data)
    }

    /// Returns the payload as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn string_data(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Returns `true` if this is a register read.
    #[must_use]
    pub const fn is_reg_get(&self) -> bool {
        self.service_command & CMD_TYPE_MASK == CMD_GET_REG
    }

    /// Returns `true` if this is a register write.
    #[must_use]
    pub const fn is_reg_set(&self) -> bool {
        self.service_command & CMD_TYPE_MASK == CMD_SET_REG
    }

    /// Register code of a get/set command.
    #[must_use]
    pub const fn reg_code(&self) -> u16 {
        self.service_command & CMD_REG_MASK
    }

    /// Returns `true` if this is an event packet.
    #[must_use]
    pub const fn is_event(&self) -> bool {
        self.service_command & CMD_EVENT_MASK != 0
    }

    /// Event code of an event packet.
    #[must_use]
    pub const fn event_code(&self) -> u16 {
        self.service_command & CMD_EVENT_CODE_MASK
    }
}

/// Returns `true` if `register` lives in the read-only block.
#[must_use]
pub const fn is_read_only_register(register: u16) -> bool {
    register >> 8 == REG_READ_ONLY_BLOCK
}

/// Builds the command of an event packet.
#[must_use]
pub const fn event_command(code: u8, counter: u16) -> u16 {
    CMD_EVENT_MASK
        | ((counter & CMD_EVENT_COUNTER_MASK) << CMD_EVENT_COUNTER_POS)
        | (code as u16 & CMD_EVENT_CODE_MASK)
}

/// Builds the command of a pipe data packet.
#[must_use]
pub const fn pipe_command(port: u16, counter: u16, close: bool) -> u16 {
    let cmd = (port << PIPE_PORT_SHIFT) | (counter & PIPE_COUNTER_MASK);
    if close { cmd | PIPE_CLOSE_MASK } else { cmd }
}

/// Where an outbound packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// A report from one of this node's services.
    Report {
        /// Index of the reporting service.
        service_index: u8,
    },
    /// A command sent to a service on another device.
    Command {
        /// Target device identifier.
        device_id: u64,
        /// Target service index on that device.
        service_index: u8,
    },
}

/// Outbound packet handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Addressing.
    pub destination: Destination,
    /// Packet to send.
    pub packet: Packet,
}

impl Frame {
    /// Creates a report frame for the service at `service_index`.
    #[must_use]
    pub const fn report(service_index: u8, packet: Packet) -> Self {
        Self {
            destination: Destination::Report { service_index },
            packet,
        }
    }

    /// Creates a command frame for a service on another device.
    #[must_use]
    pub const fn command(device_id: u64, service_index: u8, packet: Packet) -> Self {
        Self {
            destination: Destination::Command {
                device_id,
                service_index,
            },
            packet,
        }
    }
}

/// Inbound packet delivered by the transport to a local service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Index of the addressed service.
    pub service_index: u8,
    /// Packet payload.
    pub packet: Packet,
}

impl Inbound {
    /// Creates an inbound packet for the service at `service_index`.
    #[must_use]
    pub const fn new(service_index: u8, packet: Packet) -> Self {
        Self {
            service_index,
            packet,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn register_command_classification() {
        let get = Packet::from_command(CMD_GET_REG | 0x80);
        assert!(get.is_reg_get());
        assert!(!get.is_reg_set());
        assert_eq!(get.reg_code(), 0x80);

        let set = Packet::from_command(CMD_SET_REG | 0x181);
        assert!(set.is_reg_set());
        assert_eq!(set.reg_code(), 0x181);

        let plain = Packet::from_command(0x80);
        assert!(!plain.is_reg_get());
        assert!(!plain.is_reg_set());
    }

    #[test]
    fn read_only_block() {
        assert!(is_read_only_register(0x181));
        assert!(!is_read_only_register(0x81));
        assert!(!is_read_only_register(0x281));
    }

    #[test]
    fn event_command_layout() {
        let cmd = event_command(SYSTEM_EVENT_CHANGE, 5);
        assert_eq!(cmd, 0x8503);
        assert!(Packet::from_command(cmd).is_event());
        assert_eq!(Packet::from_command(cmd).event_code(), 0x03);
        // counter wraps at 7 bits
        assert_eq!(event_command(0x81, 0x80), 0x8081);
    }

    #[test]
    fn pipe_command_layout() {
        assert_eq!(pipe_command(3, 1, false), (3 << 7) | 1);
        assert_eq!(pipe_command(3, 33, true), (3 << 7) | 1 | PIPE_CLOSE_MASK);
    }

    #[test]
    fn packed_payload_round_trips() {
        let Ok(pkt) = Packet::packed_as(0x81, "z b", &("k".to_string(), vec![7u8])) else {
            panic!("pack failed");
        };
        assert_eq!(pkt.data(), b"k\0\x07");
        assert_eq!(
            pkt.unpack_as::<(String, Vec<u8>)>("z b"),
            Ok(("k".to_string(), vec![7]))
        );
    }

    #[test]
    fn string_data_is_lossy() {
        let pkt = Packet::new(0x80, vec![b'a', 0xff]);
        assert_eq!(pkt.string_data(), "a\u{fffd}");
    }
}
