//! # jacdac-node
//!
//! Service layer of a Jacdac device node: the logger and settings
//! services, the register/command dispatch contract they share, and the
//! local event source that decouples services from their observers.
//!
//! The wire transport is out of scope. Services send through the
//! [`host::Bus`] trait and receive already-decoded [`domain::Packet`]s;
//! time, console verbosity, persistence and bulk responses are injected
//! the same way, so everything runs against in-process fakes in tests.
//!
//! ## Architecture
//!
//! ```text
//! Transport (inbound packets)
//!     │
//!     ├── Node router (node.rs)
//!     │
//!     ├── Services (service/)
//!     │     ├── LoggerService    ── Clock, ConsoleThreshold
//!     │     ├── SettingsService  ── SettingsStore, ResponsePipe
//!     │     └── ProtoTestService ── ResponsePipe
//!     │
//!     ├── Packets, codec, EventSource (domain/)
//!     │
//!     └── Bus, stores, pipes, clocks, console (host/)
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod node;
pub mod service;
