//! Channel-backed bus.
//!
//! [`ChannelBus`] wraps a [`tokio::sync::mpsc`] unbounded channel. Every
//! outbound frame is pushed into the channel; the transport (or a test)
//! drains the receiver.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::Bus;
use crate::domain::Frame;

/// [`Bus`] that hands frames to an mpsc receiver.
#[derive(Debug)]
pub struct ChannelBus {
    sender: mpsc::UnboundedSender<Frame>,
    running: AtomicBool,
    max_payload_size: usize,
}

impl ChannelBus {
    /// Creates a running bus and the receiver draining it.
    #[must_use]
    pub fn new(max_payload_size: usize) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let bus = Self {
            sender,
            running: AtomicBool::new(true),
            max_payload_size,
        };
        (bus, receiver)
    }

    /// Starts or stops the bus.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl Bus for ChannelBus {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn send(&self, frame: Frame) {
        if self.sender.send(frame).is_err() {
            tracing::warn!("bus receiver dropped; frame discarded");
        }
    }
}
