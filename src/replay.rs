//! Offline adapter driven by a recorded discovery feed.
//!
//! The feed is JSON Lines, one event per line:
//!
//! ```text
//! {"type":"state","state":"powered_on"}
//! {"type":"advertisement","id":"c4:7c:8d:6a:00:01","data":"4c000215...","rssi":-61}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. A malformed line
//! (bad UTF-8, bad JSON, bad hex) is logged and skipped. It never ends the
//! replay.

use crate::adapter::{Adapter, AdapterState, Advertisement};
use crate::error::{Error, Result};
use crate::scanner::{Discovery, Scanner};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    State {
        state: AdapterState,
    },
    Advertisement {
        id: String,
        /// Hex-encoded manufacturer data
        data: String,
        rssi: i32,
    },
}

impl FeedEvent {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn from_advertisement(advertisement: &Advertisement) -> Self {
        FeedEvent::Advertisement {
            id: advertisement.id.clone(),
            data: hex::encode(&advertisement.manufacturer_data),
            rssi: advertisement.rssi,
        }
    }
}

/// Adapter that only tracks whether the scanner wants it scanning.
/// Advertisements in the feed are delivered only while it is.
#[derive(Debug, Default)]
pub struct ReplayAdapter {
    scanning: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
}

impl ReplayAdapter {
    pub fn new() -> Self {
        ReplayAdapter::default()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// (start, stop) commands received so far
    pub fn command_counts(&self) -> (u64, u64) {
        (
            self.starts.load(Ordering::SeqCst),
            self.stops.load(Ordering::SeqCst),
        )
    }
}

impl Adapter for ReplayAdapter {
    fn start_scanning(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(true, Ordering::SeqCst);
    }

    fn stop_scanning(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: u64,
    pub state_changes: u64,
    pub new_devices: u64,
    pub updates: u64,
    pub filtered: u64,
    /// Advertisements seen while the adapter was not scanning
    pub skipped: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Pause between events, to replay at a human-watchable pace
    pub delay: Option<Duration>,
}

/// Feed every event of `reader` into `scanner` until the feed ends or
/// `running` is cleared.
pub async fn replay<R: BufRead>(
    reader: R,
    scanner: &Scanner<Arc<ReplayAdapter>>,
    options: &ReplayOptions,
    running: Arc<AtomicBool>,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();

    for (index, line) in reader.split(b'\n').enumerate() {
        if !running.load(Ordering::SeqCst) {
            info!("Replay interrupted after {} lines", stats.lines);
            break;
        }

        let line = match String::from_utf8(line?) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping feed line {}: {}", index + 1, e);
                stats.lines += 1;
                stats.malformed += 1;
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stats.lines += 1;

        let event = match FeedEvent::parse(line).and_then(to_input) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed feed line {}: {}", index + 1, e);
                stats.malformed += 1;
                continue;
            }
        };

        match event {
            Input::State(state) => {
                stats.state_changes += 1;
                scanner.on_adapter_state_changed(state);
            }
            Input::Advertisement(advertisement) => {
                if !scanner.adapter().is_scanning() {
                    debug!("Adapter not scanning, dropping advertisement from {}", advertisement.id);
                    stats.skipped += 1;
                    continue;
                }
                match scanner.on_discovered(advertisement) {
                    Discovery::NewDevice => stats.new_devices += 1,
                    Discovery::Updated => stats.updates += 1,
                    Discovery::Filtered => stats.filtered += 1,
                }
            }
        }

        if let Some(delay) = options.delay {
            tokio::time::sleep(delay).await;
        }
    }

    Ok(stats)
}

enum Input {
    State(AdapterState),
    Advertisement(Advertisement),
}

fn to_input(event: FeedEvent) -> Result<Input> {
    match event {
        FeedEvent::State { state } => Ok(Input::State(state)),
        FeedEvent::Advertisement { id, data, rssi } => {
            let payload = decode_payload(&data)?;
            Ok(Input::Advertisement(Advertisement::new(id, payload, rssi)))
        }
    }
}

/// Hex in either case, with an optional `0x` prefix
fn decode_payload(data: &str) -> Result<Vec<u8>> {
    let text = data.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    hex::decode(text).map_err(|source| Error::InvalidPayloadHex {
        data: data.to_string(),
        source,
    })
}
