//! External collaborators consumed by the services.
//!
//! Each collaborator is a trait so services receive it by injection
//! instead of reaching for process-wide state. Reference
//! implementations live next to the traits:
//!
//! | Concern          | Trait               | Implementations                  |
//! |------------------|---------------------|----------------------------------|
//! | Transport        | [`Bus`]             | [`ChannelBus`]                   |
//! | Time             | [`Clock`]           | [`MonotonicClock`], [`ManualClock`] |
//! | Console verbosity| [`ConsoleThreshold`]| [`Console`]                      |
//! | Key-value store  | [`SettingsStore`]   | [`MemoryStore`], [`FileStore`]   |
//! | Bulk responses   | [`ResponsePipe`]    | [`OutPipe`]                      |

pub mod bus;
pub mod clock;
pub mod console;
pub mod pipe;
pub mod store;

use std::fmt;

use crate::domain::{Frame, MAX_PAYLOAD_SIZE, Packet, Priority};
use crate::error::{PipeError, StoreError};

pub use bus::ChannelBus;
pub use clock::{ManualClock, MonotonicClock};
pub use console::Console;
pub use pipe::{OutPipe, respond_for_each};
pub use store::{FileStore, MemoryStore};

/// Transport accepting outbound frames.
pub trait Bus: fmt::Debug + Send + Sync {
    /// Returns `true` while the bus is up. Services stay silent otherwise.
    fn is_running(&self) -> bool;

    /// Largest payload of a single packet.
    fn max_payload_size(&self) -> usize {
        MAX_PAYLOAD_SIZE
    }

    /// Queues `frame` for transmission.
    fn send(&self, frame: Frame);
}

/// Monotonic millisecond clock with an arbitrary epoch.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Milliseconds since the clock's epoch.
    fn millis(&self) -> u64;
}

/// Capability to make the process-wide console more verbose.
pub trait ConsoleThreshold: fmt::Debug + Send + Sync {
    /// Lowers the console's minimum priority to at most `at_most`.
    /// Never raises it.
    fn lower_min_priority(&self, at_most: Priority);
}

/// Persistent key-value store shared by the whole node.
pub trait SettingsStore: fmt::Debug + Send + Sync {
    /// Keys starting with `prefix`, in ascending order.
    fn list(&self, prefix: &str) -> Vec<String>;

    /// Value stored under `key`.
    fn read_buffer(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the value could not be persisted.
    fn write_buffer(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Removes `key`. Absent keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the removal could not be persisted.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Streams multi-record responses back to a requester.
pub trait ResponsePipe: fmt::Debug + Send + Sync {
    /// Sends every record of `records` to the pipe opened by `request`,
    /// then closes the pipe. Returns the number of records sent.
    ///
    /// # Errors
    ///
    /// Returns a [`PipeError`] if `request` does not describe a pipe.
    fn respond(
        &self,
        request: &Packet,
        records: &mut dyn Iterator<Item = Vec<u8>>,
    ) -> Result<usize, PipeError>;
}
