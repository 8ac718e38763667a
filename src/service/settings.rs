//! Settings service: a remotely accessible key-value store.
//!
//! Keys live in the host store under [`SETTINGS_PREFIX`]. Keys starting
//! with [`SECRET_SIGIL`] are write-only from the bus: reads and listings
//! return an empty value for them. Every mutation announces a change on
//! the bus and to local `"change"` listeners.

use std::sync::Arc;

use crate::domain::Packet;
use crate::domain::pack::pack_as;
use crate::error::{NodeError, StoreError};
use crate::host::{Bus, ResponsePipe, SettingsStore, respond_for_each};

use super::{Disposition, Service, ServiceCore};

/// Service class of the settings store.
pub const SRV_SETTINGS: u32 = 0x1107_dc4a;

/// Namespace of settings keys in the host store.
pub const SETTINGS_PREFIX: &str = "jd:";

/// Leading character of keys whose values are never read back.
pub const SECRET_SIGIL: char = '$';

/// `get` command: `key` in, `key value` back.
pub const CMD_GET: u16 = 0x80;
/// `set` command: `z b` payload.
pub const CMD_SET: u16 = 0x81;
/// `list_keys` command: streams `s` records.
pub const CMD_LIST_KEYS: u16 = 0x82;
/// `list` command: streams `z b` records.
pub const CMD_LIST: u16 = 0x83;
/// `delete` command: `key` payload.
pub const CMD_DELETE: u16 = 0x84;
/// `clear` command.
pub const CMD_CLEAR: u16 = 0x85;

const ENTRY_FORMAT: &str = "z b";
const KEY_FORMAT: &str = "s";

/// Commands understood by the settings service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsCommand {
    Get,
    Set,
    ListKeys,
    List,
    Delete,
    Clear,
}

impl SettingsCommand {
    const fn from_command(command: u16) -> Option<Self> {
        match command {
            CMD_GET => Some(Self::Get),
            CMD_SET => Some(Self::Set),
            CMD_LIST_KEYS => Some(Self::ListKeys),
            CMD_LIST => Some(Self::List),
            CMD_DELETE => Some(Self::Delete),
            CMD_CLEAR => Some(Self::Clear),
            _ => None,
        }
    }
}

/// Returns `true` if `key` names a secret.
#[must_use]
pub fn is_secret(key: &str) -> bool {
    key.starts_with(SECRET_SIGIL)
}

fn namespaced(key: &str) -> String {
    format!("{SETTINGS_PREFIX}{key}")
}

/// Settings service state.
#[derive(Debug)]
pub struct SettingsService {
    core: ServiceCore,
    store: Arc<dyn SettingsStore>,
    pipe: Arc<dyn ResponsePipe>,
}

impl SettingsService {
    /// Creates a settings service over `store`, streaming listings through
    /// `pipe`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn Bus>,
        store: Arc<dyn SettingsStore>,
        pipe: Arc<dyn ResponsePipe>,
    ) -> Self {
        Self {
            core: ServiceCore::new(SRV_SETTINGS, bus),
            store,
            pipe,
        }
    }

    /// Settings keys (without the namespace) that start with `prefix`.
    #[must_use]
    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.store
            .list(&namespaced(prefix))
            .into_iter()
            .filter_map(|key| key.strip_prefix(SETTINGS_PREFIX).map(str::to_string))
            .collect()
    }

    /// Raw value of `key`, secrets included.
    #[must_use]
    pub fn read_buffer(&self, key: &str) -> Option<Vec<u8>> {
        self.store.read_buffer(&namespaced(key))
    }

    /// Removes `key` locally. Does not announce a change.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store fails.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(&namespaced(key))
    }

    /// Value visible over the bus: empty for secrets and absent keys.
    fn visible_value(&self, key: &str) -> Vec<u8> {
        if is_secret(key) {
            return Vec::new();
        }
        self.read_buffer(key).unwrap_or_default()
    }

    fn handle_get(&self, packet: &Packet) {
        let key = packet.string_data();
        let mut payload = packet.data().to_vec();
        payload.extend_from_slice(&self.visible_value(&key));
        self.core.send_report(Packet::new(CMD_GET, payload));
    }

    fn handle_set(&mut self, packet: &Packet) -> Result<(), NodeError> {
        let (key, value): (String, Vec<u8>) = match packet.unpack_as(ENTRY_FORMAT) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(error = %err, "malformed settings set");
                return Ok(());
            }
        };
        let key = key.trim();
        if key.is_empty() {
            tracing::debug!("settings set with empty key ignored");
            return Ok(());
        }

        let stored = if value.is_empty() {
            tracing::debug!(key, "setting removed");
            self.store.remove(&namespaced(key))
        } else {
            tracing::debug!(key, len = value.len(), "setting stored");
            self.store.write_buffer(&namespaced(key), &value)
        };
        if let Err(err) = stored {
            tracing::warn!(key, error = %err, "settings write failed");
        }
        self.core.send_change_event()?;
        Ok(())
    }

    fn handle_delete(&mut self, packet: &Packet) -> Result<(), NodeError> {
        let key = packet.string_data();
        if key.is_empty() {
            return Ok(());
        }
        tracing::debug!(key = %key, "setting deleted");
        if let Err(err) = self.delete(&key) {
            tracing::warn!(key = %key, error = %err, "settings delete failed");
        }
        self.core.send_change_event()?;
        Ok(())
    }

    fn handle_clear(&mut self) -> Result<(), NodeError> {
        let keys = self.store.list(SETTINGS_PREFIX);
        tracing::debug!(count = keys.len(), "settings cleared");
        for key in keys {
            if let Err(err) = self.store.remove(&key) {
                tracing::warn!(key = %key, error = %err, "settings clear failed");
            }
        }
        self.core.send_change_event()?;
        Ok(())
    }

    fn handle_list_keys(&self, packet: &Packet) {
        let keys = self.list("");
        if let Err(err) = respond_for_each(self.pipe.as_ref(), packet, keys, |key| {
            pack_as(KEY_FORMAT, &key)
        }) {
            tracing::warn!(error = %err, "list_keys without a usable pipe");
        }
    }

    fn handle_list(&self, packet: &Packet) {
        let keys = self.list("");
        if let Err(err) = respond_for_each(self.pipe.as_ref(), packet, keys, |key| {
            let value = self.visible_value(&key);
            pack_as(ENTRY_FORMAT, &(key, value))
        }) {
            tracing::warn!(error = %err, "list without a usable pipe");
        }
    }
}

impl Service for SettingsService {
    fn name(&self) -> &'static str {
        "settings"
    }

    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ServiceCore {
        &mut self.core
    }

    fn handle_packet(&mut self, packet: &Packet) -> Result<Disposition, NodeError> {
        let Some(command) = SettingsCommand::from_command(packet.service_command()) else {
            return Ok(Disposition::PossiblyNotImplemented);
        };
        match command {
            SettingsCommand::Get => self.handle_get(packet),
            SettingsCommand::Set => self.handle_set(packet)?,
            SettingsCommand::ListKeys => self.handle_list_keys(packet),
            SettingsCommand::List => self.handle_list(packet),
            SettingsCommand::Delete => self.handle_delete(packet)?,
            SettingsCommand::Clear => self.handle_clear()?,
        }
        Ok(Disposition::Handled)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::packet::{PIPE_CLOSE_MASK, SYSTEM_EVENT_CHANGE};
    use crate::domain::pack::unpack_as;
    use crate::domain::{CHANGE, EventArg, Frame, handler};
    use crate::host::{ChannelBus, MemoryStore, OutPipe};
    use crate::service::tests::drain;

    struct Fixture {
        settings: SettingsService,
        store: Arc<MemoryStore>,
        bus: Arc<ChannelBus>,
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    fn fixture() -> Fixture {
        let (bus, rx) = ChannelBus::new(236);
        let bus = Arc::new(bus);
        let store = Arc::new(MemoryStore::new());
        let pipe = Arc::new(OutPipe::new(Arc::clone(&bus) as Arc<dyn Bus>));
        let mut settings = SettingsService::new(
            Arc::clone(&bus) as Arc<dyn Bus>,
            Arc::clone(&store) as Arc<dyn SettingsStore>,
            pipe,
        );
        settings.core_mut().attach(3);
        settings.core_mut().set_running(true);
        Fixture {
            settings,
            store,
            bus,
            rx,
        }
    }

    fn set(f: &mut Fixture, key: &str, value: &[u8]) {
        let Ok(pkt) = Packet::packed_as(CMD_SET, ENTRY_FORMAT, &(key.to_string(), value.to_vec()))
        else {
            panic!("pack failed");
        };
        let Ok(d) = f.settings.dispatch(&pkt) else {
            panic!("set failed");
        };
        assert_eq!(d, Disposition::Handled);
    }

    fn get(f: &mut Fixture, key: &str) -> Vec<u8> {
        drain(&mut f.rx);
        let Ok(d) = f.settings.dispatch(&Packet::new(CMD_GET, key.as_bytes().to_vec())) else {
            panic!("get failed");
        };
        assert_eq!(d, Disposition::Handled);
        let frames = drain(&mut f.rx);
        let Some(report) = frames.first() else {
            panic!("expected get report");
        };
        assert_eq!(report.packet.service_command(), CMD_GET);
        report.packet.data().to_vec()
    }

    fn pipe_request(command: u16) -> Packet {
        let Ok(pkt) = Packet::packed_as(command, "b[8] u16", &(7u64.to_le_bytes().to_vec(), 5u16))
        else {
            panic!("pack failed");
        };
        pkt
    }

    fn pipe_records(frames: &[Frame]) -> Vec<Vec<u8>> {
        frames
            .iter()
            .filter(|f| f.packet.service_command() & PIPE_CLOSE_MASK == 0)
            .map(|f| f.packet.data().to_vec())
            .collect()
    }

    #[test]
    fn get_echoes_key_then_value() {
        let mut f = fixture();
        set(&mut f, "name", b"node-1");
        assert_eq!(get(&mut f, "name"), b"namenode-1".to_vec());
        assert_eq!(f.store.read_buffer("jd:name"), Some(b"node-1".to_vec()));
    }

    #[test]
    fn absent_key_reads_empty() {
        let mut f = fixture();
        assert_eq!(get(&mut f, "missing"), b"missing".to_vec());
    }

    #[test]
    fn secrets_are_write_only() {
        let mut f = fixture();
        set(&mut f, "$token", b"hunter2");
        assert_eq!(get(&mut f, "$token"), b"$token".to_vec());
        assert_eq!(f.settings.read_buffer("$token"), Some(b"hunter2".to_vec()));

        assert!(f.settings.dispatch(&Packet::new(CMD_DELETE, b"$token".to_vec())).is_ok());
        assert!(f.settings.list("").is_empty());
    }

    #[test]
    fn set_trims_key_and_empty_value_deletes() {
        let mut f = fixture();
        set(&mut f, "  volume ", &[7]);
        assert_eq!(f.settings.list(""), vec!["volume".to_string()]);

        set(&mut f, "volume", &[]);
        assert!(f.settings.list("").is_empty());
        assert!(f.store.is_empty());
    }

    #[test]
    fn blank_key_is_ignored() {
        let mut f = fixture();
        drain(&mut f.rx);
        set(&mut f, "   ", b"x");
        assert!(f.store.is_empty());
        assert!(drain(&mut f.rx).is_empty());
    }

    #[test]
    fn mutations_announce_change() {
        let mut f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        f.settings.core().events().on(
            CHANGE,
            handler(move |_: &EventArg| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        set(&mut f, "a", b"1");
        let frames = drain(&mut f.rx);
        let Some(event) = frames.first() else {
            panic!("expected change event");
        };
        assert!(event.packet.is_event());
        assert_eq!(event.packet.event_code(), u16::from(SYSTEM_EVENT_CHANGE));

        assert!(f.settings.dispatch(&Packet::new(CMD_DELETE, b"a".to_vec())).is_ok());
        assert!(f.settings.dispatch(&Packet::from_command(CMD_CLEAR)).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delete_is_idempotent_and_empty_key_is_noop() {
        let mut f = fixture();
        set(&mut f, "a", b"1");
        for _ in 0..2 {
            assert!(f.settings.dispatch(&Packet::new(CMD_DELETE, b"a".to_vec())).is_ok());
            assert!(f.settings.read_buffer("a").is_none());
        }

        drain(&mut f.rx);
        let Ok(d) = f.settings.dispatch(&Packet::from_command(CMD_DELETE)) else {
            panic!("delete failed");
        };
        assert_eq!(d, Disposition::Handled);
        assert!(drain(&mut f.rx).is_empty());
    }

    #[test]
    fn clear_only_touches_settings_namespace() {
        let mut f = fixture();
        set(&mut f, "a", b"1");
        set(&mut f, "b", b"2");
        assert!(f.store.write_buffer("other:keep", b"x").is_ok());

        assert!(f.settings.dispatch(&Packet::from_command(CMD_CLEAR)).is_ok());
        assert!(f.settings.list("").is_empty());
        assert_eq!(f.store.list(""), vec!["other:keep".to_string()]);
    }

    #[test]
    fn list_keys_streams_every_key() {
        let mut f = fixture();
        set(&mut f, "b", b"2");
        set(&mut f, "$secret", b"s");
        set(&mut f, "a", b"1");
        drain(&mut f.rx);

        assert!(f.settings.dispatch(&pipe_request(CMD_LIST_KEYS)).is_ok());
        let frames = drain(&mut f.rx);
        assert_eq!(frames.len(), 4);
        let keys: Vec<String> = pipe_records(&frames)
            .iter()
            .filter_map(|r| unpack_as::<String>(KEY_FORMAT, r).ok())
            .collect();
        assert_eq!(keys, vec!["$secret", "a", "b"]);
    }

    #[test]
    fn list_masks_secret_values() {
        let mut f = fixture();
        set(&mut f, "$secret", b"s");
        set(&mut f, "name", b"n1");
        drain(&mut f.rx);

        assert!(f.settings.dispatch(&pipe_request(CMD_LIST)).is_ok());
        let entries: Vec<(String, Vec<u8>)> = pipe_records(&drain(&mut f.rx))
            .iter()
            .filter_map(|r| unpack_as(ENTRY_FORMAT, r).ok())
            .collect();
        assert_eq!(
            entries,
            vec![
                ("$secret".to_string(), Vec::new()),
                ("name".to_string(), b"n1".to_vec()),
            ]
        );
    }

    #[test]
    fn list_without_descriptor_sends_nothing() {
        let mut f = fixture();
        set(&mut f, "a", b"1");
        drain(&mut f.rx);
        let Ok(d) = f.settings.dispatch(&Packet::from_command(CMD_LIST)) else {
            panic!("list failed");
        };
        assert_eq!(d, Disposition::Handled);
        assert!(drain(&mut f.rx).is_empty());
    }

    #[test]
    fn stopped_bus_silences_listings_and_reads() {
        let mut f = fixture();
        set(&mut f, "a", b"1");
        drain(&mut f.rx);
        f.bus.set_running(false);

        for request in [
            pipe_request(CMD_LIST),
            pipe_request(CMD_LIST_KEYS),
            Packet::new(CMD_GET, b"a".to_vec()),
        ] {
            let Ok(d) = f.settings.dispatch(&request) else {
                panic!("dispatch failed");
            };
            assert_eq!(d, Disposition::Handled);
        }
        assert!(drain(&mut f.rx).is_empty());
    }

    #[test]
    fn unknown_command_is_possibly_not_implemented() {
        let mut f = fixture();
        let Ok(d) = f.settings.dispatch(&Packet::from_command(0x86)) else {
            panic!("dispatch failed");
        };
        assert_eq!(d, Disposition::PossiblyNotImplemented);
    }

    #[test]
    fn list_filters_by_prefix() {
        let mut f = fixture();
        set(&mut f, "wifi.ssid", b"x");
        set(&mut f, "wifi.pass", b"y");
        set(&mut f, "name", b"z");
        assert_eq!(
            f.settings.list("wifi."),
            vec!["wifi.pass".to_string(), "wifi.ssid".to_string()]
        );
        assert!(f.settings.delete("name").is_ok());
        assert_eq!(f.settings.list("").len(), 2);
    }
}
