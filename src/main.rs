//! jacdac-node demo entry point.
//!
//! Hosts the logger and settings services (plus the protocol-test service
//! when `PROTO_TEST_ENABLED` is set) on an in-process channel bus, replays
//! a short scripted session through the inbound queue and logs every
//! outbound frame.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use jacdac_node::config::NodeConfig;
use jacdac_node::domain::packet::{CMD_GET_REG, CMD_SET_REG};
use jacdac_node::domain::{CHANGE, EventArg, Frame, Inbound, Packet, Priority, handler};
use jacdac_node::host::{
    Bus, ChannelBus, Console, ConsoleThreshold, FileStore, MemoryStore, MonotonicClock, OutPipe,
    ResponsePipe, SettingsStore,
};
use jacdac_node::node::Node;
use jacdac_node::service::Service;
use jacdac_node::service::logger::REG_MIN_PRIORITY;
use jacdac_node::service::settings::{CMD_GET, CMD_LIST, CMD_SET};
use jacdac_node::service::{Disposition, LoggerService, ProtoTestService, SettingsService};

/// Pipe owner used by the scripted session.
const DEMO_CLIENT_ID: u64 = 0x0102_0304_0506_0708;

/// Work item for the node task. Log lines share the queue with packets
/// so they are ordered against listener requests.
#[derive(Debug)]
enum NodeInput {
    Packet(Inbound),
    Log(Priority, String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = NodeConfig::from_env()?;
    tracing::info!(
        device_id = %format!("{:016x}", config.device_id),
        proto_test = config.proto_test_enabled,
        "starting jacdac node"
    );

    // Build host collaborators
    let (bus, mut outbound) = ChannelBus::new(config.max_payload_size);
    let bus: Arc<dyn Bus> = Arc::new(bus);
    let console = Arc::new(Console::new(config.console_min_priority));
    let store: Arc<dyn SettingsStore> = match &config.settings_path {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let pipe: Arc<dyn ResponsePipe> = Arc::new(OutPipe::new(Arc::clone(&bus)));

    // Build the node
    let mut node = Node::new(config.device_id);
    let logger = node.add(LoggerService::new(
        Arc::clone(&bus),
        Arc::new(MonotonicClock::new()),
        Arc::clone(&console) as Arc<dyn ConsoleThreshold>,
    ))?;
    let settings = node.add(SettingsService::new(
        Arc::clone(&bus),
        store,
        Arc::clone(&pipe),
    ))?;
    if config.proto_test_enabled {
        node.add(ProtoTestService::new(Arc::clone(&bus), pipe))?;
    }
    settings.lock().core().events().on(
        CHANGE,
        handler(|_: &EventArg| {
            tracing::info!("settings changed");
            Ok(())
        }),
    );
    node.start();

    let logger_index = logger.lock().core().service_index();
    let settings_index = settings.lock().core().service_index();

    // Single task owns the node; every packet and log line goes through it
    let (tx, mut rx) = mpsc::channel::<NodeInput>(config.inbound_queue_capacity);
    let router = tokio::spawn(async move {
        while let Some(input) = rx.recv().await {
            match input {
                NodeInput::Packet(inbound) => match node.dispatch(&inbound) {
                    Ok(Disposition::PossiblyNotImplemented) => tracing::debug!(
                        service_index = inbound.service_index,
                        command = %format!("0x{:04x}", inbound.packet.service_command()),
                        "command not implemented"
                    ),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "dispatch failed"),
                },
                NodeInput::Log(priority, message) => {
                    console.log(priority, &message);
                    logger.lock().add(priority, &message);
                }
            }
        }
        node.stop();
    });

    for input in scripted_session(logger_index, settings_index)? {
        tx.send(input).await?;
    }
    drop(tx);

    tokio::select! {
        joined = router => joined?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    while let Ok(frame) = outbound.try_recv() {
        log_frame(&frame);
    }
    tracing::info!("jacdac node stopped");

    Ok(())
}

/// A listener asking for debug output, some log lines and settings
/// traffic.
fn scripted_session(logger: u8, settings: u8) -> anyhow::Result<Vec<NodeInput>> {
    let listen = Packet::packed_as(CMD_SET_REG | REG_MIN_PRIORITY, "u8", &Priority::Debug.as_u8())?;
    let set_name = Packet::packed_as(CMD_SET, "z b", &("name".to_string(), b"demo-node".to_vec()))?;
    let set_secret = Packet::packed_as(CMD_SET, "z b", &("$token".to_string(), b"hunter2".to_vec()))?;
    let list = Packet::packed_as(
        CMD_LIST,
        "b[8] u16",
        &(DEMO_CLIENT_ID.to_le_bytes().to_vec(), 1u16),
    )?;

    Ok(vec![
        NodeInput::Packet(Inbound::new(logger, listen)),
        NodeInput::Log(Priority::Debug, "node booted".to_string()),
        NodeInput::Log(Priority::Warning, "battery low".to_string()),
        NodeInput::Packet(Inbound::new(settings, set_name)),
        NodeInput::Packet(Inbound::new(settings, set_secret)),
        NodeInput::Packet(Inbound::new(settings, Packet::new(CMD_GET, b"name".to_vec()))),
        NodeInput::Packet(Inbound::new(settings, list)),
        NodeInput::Packet(Inbound::new(
            logger,
            Packet::from_command(CMD_GET_REG | REG_MIN_PRIORITY),
        )),
        NodeInput::Log(Priority::Error, "demo finished".to_string()),
    ])
}

fn log_frame(frame: &Frame) {
    tracing::info!(
        destination = ?frame.destination,
        command = %format!("0x{:04x}", frame.packet.service_command()),
        len = frame.packet.data().len(),
        payload = %String::from_utf8_lossy(frame.packet.data()),
        "outbound"
    );
}
