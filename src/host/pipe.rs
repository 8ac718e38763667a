//! Output pipes over the bus.
//!
//! A request that wants a streamed answer starts with a pipe descriptor
//! (`b[8] u16`: requester device id, pipe port). [`OutPipe`] sends each
//! record as a command to that device's pipe service index, numbering
//! packets with a 5-bit counter, and terminates the stream with an empty
//! packet carrying the close flag.

use std::sync::Arc;

use super::{Bus, ResponsePipe};
use crate::domain::packet::{PIPE_SERVICE_INDEX, pipe_command};
use crate::domain::{Frame, Packet};
use crate::error::{CodecError, PipeError};

const DESCRIPTOR_FORMAT: &str = "b[8] u16";

/// [`ResponsePipe`] writing pipe packets to a [`Bus`].
#[derive(Debug, Clone)]
pub struct OutPipe {
    bus: Arc<dyn Bus>,
}

impl OutPipe {
    /// Creates a pipe writer on `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    fn descriptor(request: &Packet) -> Result<(u64, u16), PipeError> {
        let (device, port): (Vec<u8>, u16) = request.unpack_as(DESCRIPTOR_FORMAT)?;
        let device = <[u8; 8]>::try_from(device.as_slice())
            .map_err(|_| CodecError::Mismatch("b[8]".to_string()))?;
        Ok((u64::from_le_bytes(device), port))
    }
}

impl ResponsePipe for OutPipe {
    fn respond(
        &self,
        request: &Packet,
        records: &mut dyn Iterator<Item = Vec<u8>>,
    ) -> Result<usize, PipeError> {
        let (device_id, port) = Self::descriptor(request)?;
        if !self.bus.is_running() {
            tracing::debug!(device_id, port, "bus stopped, pipe not opened");
            return Ok(0);
        }
        let mut counter: u16 = 0;
        let mut sent = 0usize;
        for record in records {
            let packet = Packet::new(pipe_command(port, counter, false), record);
            self.bus
                .send(Frame::command(device_id, PIPE_SERVICE_INDEX, packet));
            counter = counter.wrapping_add(1);
            sent += 1;
        }
        let close = Packet::from_command(pipe_command(port, counter, true));
        self.bus
            .send(Frame::command(device_id, PIPE_SERVICE_INDEX, close));
        tracing::debug!(device_id, port, records = sent, "pipe closed");
        Ok(sent)
    }
}

/// Encodes every item with `encode` and streams it through `pipe`.
///
/// Items that fail to encode are logged and skipped.
///
/// # Errors
///
/// Returns a [`PipeError`] if `request` does not describe a pipe.
pub fn respond_for_each<T, I, F>(
    pipe: &dyn ResponsePipe,
    request: &Packet,
    items: I,
    mut encode: F,
) -> Result<usize, PipeError>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Result<Vec<u8>, CodecError>,
{
    let mut records = items.into_iter().filter_map(|item| match encode(item) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!(error = %err, "skipping record that failed to encode");
            None
        }
    });
    pipe.respond(request, &mut records)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::Destination;
    use crate::domain::packet::PIPE_CLOSE_MASK;
    use crate::domain::pack::pack_as;
    use crate::host::ChannelBus;

    fn pipe_request(device: u64, port: u16) -> Packet {
        let Ok(pkt) = Packet::packed_as(0x82, DESCRIPTOR_FORMAT, &(device.to_le_bytes().to_vec(), port))
        else {
            panic!("pack failed");
        };
        pkt
    }

    #[test]
    fn streams_records_then_closes() {
        let (bus, mut rx) = ChannelBus::new(236);
        let pipe = OutPipe::new(Arc::new(bus));
        let request = pipe_request(0xaabb, 3);

        let sent = respond_for_each(&pipe, &request, ["a", "b"], |s| pack_as("s", &s.to_string()));
        assert_eq!(sent, Ok(2));

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        let commands: Vec<u16> = frames.iter().map(|f| f.packet.service_command()).collect();
        assert_eq!(commands, vec![3 << 7, (3 << 7) | 1, (3 << 7) | 2 | PIPE_CLOSE_MASK]);
        assert!(frames.iter().all(|f| f.destination
            == Destination::Command {
                device_id: 0xaabb,
                service_index: PIPE_SERVICE_INDEX
            }));
        let Some(first) = frames.first() else {
            panic!("no frames");
        };
        assert_eq!(first.packet.data(), b"a");
    }

    #[test]
    fn empty_stream_still_closes() {
        let (bus, mut rx) = ChannelBus::new(236);
        let pipe = OutPipe::new(Arc::new(bus));
        let sent = respond_for_each(&pipe, &pipe_request(1, 0), Vec::<String>::new(), |s| {
            pack_as("s", &s)
        });
        assert_eq!(sent, Ok(0));
        let Ok(frame) = rx.try_recv() else {
            panic!("expected close packet");
        };
        assert_eq!(frame.packet.service_command(), PIPE_CLOSE_MASK);
        assert!(frame.packet.data().is_empty());
    }

    #[test]
    fn stopped_bus_sends_nothing() {
        let (bus, mut rx) = ChannelBus::new(236);
        let bus = Arc::new(bus);
        bus.set_running(false);
        let pipe = OutPipe::new(Arc::clone(&bus) as Arc<dyn Bus>);
        let sent = respond_for_each(&pipe, &pipe_request(1, 2), ["a"], |s| {
            pack_as("s", &s.to_string())
        });
        assert_eq!(sent, Ok(0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_descriptor_is_rejected() {
        let (bus, mut rx) = ChannelBus::new(236);
        let pipe = OutPipe::new(Arc::new(bus));
        let request = Packet::new(0x82, vec![1, 2, 3]);
        let sent = respond_for_each(&pipe, &request, ["a"], |s| pack_as("s", &s.to_string()));
        assert!(sent.is_err());
        assert!(rx.try_recv().is_err());
    }
}
