//! Live adapter backed by BlueZ (Linux only).
//!
//! [`BluezAdapter`] is the command half handed to the [`Scanner`]; it
//! forwards start/stop requests over a channel. [`BluezDriver`] owns the
//! D-Bus session, turns adapter power changes into [`AdapterState`]s and
//! device property changes into [`Advertisement`]s, and must be polled with
//! [`BluezDriver::run`] for anything to happen.

use crate::adapter::{Adapter, AdapterState, Advertisement};
use crate::error::Result;
use crate::scanner::Scanner;
use bluer::{AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How often the driver re-checks the running flag when the radio is quiet
const IDLE_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanCommand {
    Start,
    Stop,
}

#[derive(Debug, Clone)]
pub struct BluezAdapter {
    commands: mpsc::UnboundedSender<ScanCommand>,
}

impl Adapter for BluezAdapter {
    fn start_scanning(&self) {
        if self.commands.send(ScanCommand::Start).is_err() {
            warn!("BlueZ driver is gone, cannot start scanning");
        }
    }

    fn stop_scanning(&self) {
        if self.commands.send(ScanCommand::Stop).is_err() {
            debug!("BlueZ driver is gone, nothing to stop");
        }
    }
}

pub struct BluezDriver {
    _session: Session,
    adapter: bluer::Adapter,
    commands: mpsc::UnboundedReceiver<ScanCommand>,
}

/// Open the default BlueZ adapter.
pub async fn connect() -> Result<(BluezAdapter, BluezDriver)> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    info!("Using Bluetooth adapter {}", adapter.name());

    let (tx, rx) = mpsc::unbounded_channel();
    Ok((
        BluezAdapter { commands: tx },
        BluezDriver {
            _session: session,
            adapter,
            commands: rx,
        },
    ))
}

impl BluezDriver {
    /// Pump adapter and discovery events into `scanner` until `running` is
    /// cleared.
    pub async fn run(self, scanner: &Scanner<BluezAdapter>, running: Arc<AtomicBool>) -> Result<()> {
        let BluezDriver {
            _session,
            adapter,
            mut commands,
        } = self;

        let mut adapter_events = adapter.events().await?.boxed();
        let mut discovery: Option<BoxStream<'_, AdapterEvent>> = None;
        let mut tick = tokio::time::interval(IDLE_TICK);

        let powered = adapter.is_powered().await?;
        scanner.on_adapter_state_changed(power_state(powered));

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                Some(command) = commands.recv() => {
                    match command {
                        ScanCommand::Start if discovery.is_none() => {
                            discovery = Some(start_discovery(&adapter).await?);
                            info!("BlueZ discovery started");
                        }
                        ScanCommand::Stop if discovery.is_some() => {
                            // dropping the stream ends the discovery session
                            discovery = None;
                            info!("BlueZ discovery stopped");
                        }
                        _ => {}
                    }
                }
                Some(event) = adapter_events.next() => {
                    if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                        scanner.on_adapter_state_changed(power_state(powered));
                    }
                }
                Some(event) = next_event(&mut discovery) => {
                    if let AdapterEvent::DeviceAdded(address) = event {
                        deliver(&adapter, scanner, address).await;
                    }
                }
                _ = tick.tick() => {}
            }
        }

        Ok(())
    }
}

async fn start_discovery(adapter: &bluer::Adapter) -> Result<BoxStream<'_, AdapterEvent>> {
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;
    let events = adapter.discover_devices_with_changes().await?;
    Ok(events.boxed())
}

async fn deliver(adapter: &bluer::Adapter, scanner: &Scanner<BluezAdapter>, address: Address) {
    let device = match adapter.device(address) {
        Ok(device) => device,
        Err(e) => {
            debug!("Device {} vanished: {}", address, e);
            return;
        }
    };

    let rssi = match device.rssi().await {
        Ok(Some(rssi)) => i32::from(rssi),
        Ok(None) => return,
        Err(e) => {
            debug!("No RSSI for {}: {}", address, e);
            return;
        }
    };

    let manufacturer_data = match device.manufacturer_data().await {
        Ok(Some(data)) => raw_manufacturer_data(&data),
        Ok(None) => Vec::new(),
        Err(e) => {
            debug!("No manufacturer data for {}: {}", address, e);
            Vec::new()
        }
    };

    scanner.on_discovered(Advertisement::new(address.to_string(), manufacturer_data, rssi));
}

fn power_state(powered: bool) -> AdapterState {
    if powered {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

async fn next_event(stream: &mut Option<BoxStream<'_, AdapterEvent>>) -> Option<AdapterEvent> {
    match stream {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

/// BlueZ splits off the company id; put it back (little-endian) so payload
/// offsets match the raw manufacturer-specific AD structure.
fn raw_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    let Some((company, payload)) = data.iter().min_by_key(|(company, _)| **company) else {
        return Vec::new();
    };

    let mut raw = Vec::with_capacity(payload.len() + 2);
    raw.extend_from_slice(&company.to_le_bytes());
    raw.extend_from_slice(payload);
    raw
}
