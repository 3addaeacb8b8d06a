use crate::adapter::Advertisement;
use crate::error::{Error, Result};
use crate::notify::{SubscriptionId, Subscribers};
use crate::signal::{self, ReferencePower};
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Default number of readings retained per device
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

// iBeacon-style manufacturer data offsets (company id included)
const MAJOR_OFFSET: usize = 20;
const MINOR_OFFSET: usize = 22;
const TX_POWER_OFFSET: usize = 24;

/// Per-device settings fixed at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSettings {
    pub reference_power: ReferencePower,
    /// Prefer the measured power byte carried in the payload when present
    pub use_advertised_power: bool,
    pub history_capacity: usize,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            reference_power: ReferencePower::DEFAULT,
            use_advertised_power: false,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct History {
    /// Ring buffer, never empty
    readings: VecDeque<i32>,
    capacity: usize,
    total: u64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// One physical beacon and its signal history.
///
/// Devices are created by the [`Scanner`](crate::scanner::Scanner) from the
/// first matching advertisement and shared as `Arc<Device>`.
#[derive(Debug)]
pub struct Device {
    id: String,
    manufacturer_data: Vec<u8>,
    reference_power: ReferencePower,
    history: Mutex<History>,
    reading_subscribers: Subscribers<i32>,
}

/// Serializable point-in-time view of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub rssi: i32,
    pub distance: u64,
    pub accuracy: f64,
    pub major: Option<u16>,
    pub minor: Option<u16>,
    pub readings: u64,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Create a device seeded with the advertisement's reading. The seed does
    /// not notify anyone: nobody can be subscribed yet.
    pub fn new(advertisement: &Advertisement, settings: &DeviceSettings) -> Self {
        let capacity = settings.history_capacity.max(1);
        let mut readings = VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY));
        readings.push_back(advertisement.rssi);
        let now = Utc::now();

        let reference_power = if settings.use_advertised_power {
            advertised_power_at(&advertisement.manufacturer_data)
                .ok()
                .and_then(|p| ReferencePower::new(i32::from(p)).ok())
                .unwrap_or(settings.reference_power)
        } else {
            settings.reference_power
        };

        Device {
            id: advertisement.id.clone(),
            manufacturer_data: advertisement.manufacturer_data.clone(),
            reference_power,
            history: Mutex::new(History {
                readings,
                capacity,
                total: 1,
                first_seen: now,
                last_seen: now,
            }),
            reading_subscribers: Subscribers::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Manufacturer data of the advertisement that created this device
    pub fn payload(&self) -> &[u8] {
        &self.manufacturer_data
    }

    pub fn reference_power(&self) -> ReferencePower {
        self.reference_power
    }

    /// Record a reading and notify reading subscribers synchronously, in
    /// registration order.
    pub fn add_reading(&self, rssi: i32) {
        {
            let mut history = self.history.lock();
            if history.readings.len() >= history.capacity {
                history.readings.pop_front();
            }
            history.readings.push_back(rssi);
            history.total += 1;
            history.last_seen = Utc::now();
        }

        debug!("Device {} rssi={}", self.id, rssi);
        self.reading_subscribers.emit(&rssi);
    }

    pub fn latest_reading(&self) -> i32 {
        let history = self.history.lock();
        // the seed reading guarantees at least one entry
        history.readings.back().copied().unwrap_or_default()
    }

    /// Retained readings, oldest first
    pub fn history(&self) -> Vec<i32> {
        self.history.lock().readings.iter().copied().collect()
    }

    /// Readings ever recorded, including ones evicted from the history
    pub fn reading_count(&self) -> u64 {
        self.history.lock().total
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.history.lock().first_seen
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.history.lock().last_seen
    }

    pub fn distance(&self) -> u64 {
        signal::distance(self.latest_reading(), self.reference_power)
    }

    pub fn accuracy(&self) -> f64 {
        signal::accuracy(self.latest_reading(), self.reference_power)
    }

    pub fn subscribe_to_reading_updates<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&i32) + Send + Sync + 'static,
    {
        self.reading_subscribers.subscribe(callback)
    }

    pub fn unsubscribe_from_reading_updates(&self, id: SubscriptionId) -> bool {
        self.reading_subscribers.unsubscribe(id)
    }

    pub fn reading_subscriber_count(&self) -> usize {
        self.reading_subscribers.len()
    }

    pub fn major(&self) -> Result<u16> {
        read_u16_be(&self.manufacturer_data, MAJOR_OFFSET, "major")
    }

    pub fn minor(&self) -> Result<u16> {
        read_u16_be(&self.manufacturer_data, MINOR_OFFSET, "minor")
    }

    /// Signed measured-power byte of the payload
    pub fn advertised_power(&self) -> Result<i8> {
        advertised_power_at(&self.manufacturer_data)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let (rssi, readings, last_seen) = {
            let history = self.history.lock();
            (
                history.readings.back().copied().unwrap_or_default(),
                history.total,
                history.last_seen,
            )
        };

        DeviceSnapshot {
            id: self.id.clone(),
            rssi,
            distance: signal::distance(rssi, self.reference_power),
            accuracy: signal::accuracy(rssi, self.reference_power),
            major: self.major().ok(),
            minor: self.minor().ok(),
            readings,
            last_seen,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rssi={}", self.id, self.latest_reading())
    }
}

fn read_u16_be(data: &[u8], offset: usize, field: &'static str) -> Result<u16> {
    match data.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(Error::PayloadTooShort {
            field,
            needed: offset + 2,
            actual: data.len(),
        }),
    }
}

fn advertised_power_at(data: &[u8]) -> Result<i8> {
    data.get(TX_POWER_OFFSET)
        .map(|b| *b as i8)
        .ok_or(Error::PayloadTooShort {
            field: "tx power",
            needed: TX_POWER_OFFSET + 1,
            actual: data.len(),
        })
}
