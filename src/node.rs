//! Node: owns the hosted services and routes inbound packets to them.
//!
//! Service index 0 is the control service, which lives in the transport
//! layer; hosted services are numbered from 1 in the order they are added.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::Inbound;
use crate::error::NodeError;
use crate::service::{Disposition, Service};

/// Highest service index handed out to hosted services.
pub const MAX_SERVICE_INDEX: usize = 0x30;

/// A hosted service behind its lock.
pub type SharedService = Arc<Mutex<dyn Service>>;

/// A device hosting a set of services.
#[derive(Debug)]
pub struct Node {
    device_id: u64,
    services: Vec<SharedService>,
    running: bool,
}

impl Node {
    /// Creates an empty, stopped node.
    #[must_use]
    pub const fn new(device_id: u64) -> Self {
        Self {
            device_id,
            services: Vec::new(),
            running: false,
        }
    }

    /// Device identifier of this node.
    #[must_use]
    pub const fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Hosts `service` at the next free index and returns a handle to it.
    ///
    /// The service adopts the node's running state.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ServiceLimit`] when every index is taken.
    pub fn add<S: Service + 'static>(
        &mut self,
        mut service: S,
    ) -> Result<Arc<Mutex<S>>, NodeError> {
        let index = self.services.len() + 1;
        let service_index = u8::try_from(index)
            .ok()
            .filter(|_| index <= MAX_SERVICE_INDEX)
            .ok_or(NodeError::ServiceLimit(MAX_SERVICE_INDEX))?;

        service.core_mut().attach(service_index);
        service.core_mut().set_running(self.running);
        tracing::info!(
            name = service.name(),
            service_index,
            service_class = %format!("0x{:08x}", service.service_class()),
            "service added"
        );

        let shared = Arc::new(Mutex::new(service));
        let erased: SharedService = Arc::clone(&shared) as SharedService;
        self.services.push(erased);
        Ok(shared)
    }

    /// Number of hosted services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no service is hosted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Service at `service_index`, if any.
    #[must_use]
    pub fn service(&self, service_index: u8) -> Option<&SharedService> {
        usize::from(service_index)
            .checked_sub(1)
            .and_then(|slot| self.services.get(slot))
    }

    /// Index of the first service of class `service_class`.
    #[must_use]
    pub fn find_by_class(&self, service_class: u32) -> Option<u8> {
        self.services.iter().find_map(|service| {
            let service = service.lock();
            (service.service_class() == service_class).then_some(service.core().service_index())
        })
    }

    /// Service classes in index order, as announced on the bus.
    #[must_use]
    pub fn service_classes(&self) -> Vec<u32> {
        self.services
            .iter()
            .map(|service| service.lock().service_class())
            .collect()
    }

    /// Returns `true` while the node is started.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Starts every hosted service.
    pub fn start(&mut self) {
        self.set_running(true);
    }

    /// Stops every hosted service.
    pub fn stop(&mut self) {
        self.set_running(false);
    }

    fn set_running(&mut self, running: bool) {
        self.running = running;
        for service in &self.services {
            service.lock().core_mut().set_running(running);
        }
        tracing::info!(
            device_id = %format!("{:016x}", self.device_id),
            running,
            "node state changed"
        );
    }

    /// Routes `inbound` to the addressed service.
    ///
    /// Packets for the control index or an unknown index are ignored.
    ///
    /// # Errors
    ///
    /// Propagates the service's [`NodeError`].
    pub fn dispatch(&self, inbound: &Inbound) -> Result<Disposition, NodeError> {
        let Some(service) = self.service(inbound.service_index) else {
            tracing::trace!(service_index = inbound.service_index, "no service at index");
            return Ok(Disposition::Ignored);
        };
        let mut service = service.lock();
        let disposition = service.dispatch(&inbound.packet)?;
        tracing::trace!(
            name = service.name(),
            command = %format!("0x{:04x}", inbound.packet.service_command()),
            ?disposition,
            "packet dispatched"
        );
        Ok(disposition)
    }
}
