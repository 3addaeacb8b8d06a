use crate::config::OutputFormat;
use crate::device::{Device, DeviceSnapshot};
use crate::signal::Proximity;
use crate::swarm::Swarm;
use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReportLine {
    NewDevice {
        device: DeviceSnapshot,
    },
    LocationUpdate {
        timestamp: DateTime<Utc>,
        devices: Vec<DeviceSnapshot>,
    },
}

/// Writes scanner/swarm events for the operator, either as text or JSON lines.
pub struct Reporter<W: Write + Send> {
    format: OutputFormat,
    out: Mutex<W>,
}

impl Reporter<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Reporter::new(format, io::stdout())
    }
}

impl<W: Write + Send> Reporter<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Reporter {
            format,
            out: Mutex::new(out),
        }
    }

    pub fn new_device(&self, device: &Device) {
        match self.format {
            OutputFormat::Text => self.write_line(&format!("New device: {}", device)),
            OutputFormat::Json => self.write_json(&ReportLine::NewDevice {
                device: device.snapshot(),
            }),
        }
    }

    /// Called on every swarm change. Prints nothing until the swarm has a device.
    pub fn location_update(&self, swarm: &Swarm) {
        if swarm.device_count() < 1 {
            return;
        }

        match self.format {
            OutputFormat::Text => self.write_line(&format_distances(&swarm.distances())),
            OutputFormat::Json => self.write_json(&ReportLine::LocationUpdate {
                timestamp: Utc::now(),
                devices: swarm.snapshot(),
            }),
        }
    }

    /// Final per-device table, text output only
    pub fn summary(&self, swarm: &Swarm) {
        if self.format != OutputFormat::Text {
            return;
        }

        let devices = swarm.snapshot();
        self.write_line(&format!("Tracked {} devices", devices.len()));
        for device in &devices {
            self.write_line(&format_device_row(device));
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_json(&self, line: &ReportLine) {
        match serde_json::to_string(line) {
            Ok(json) => self.write_line(&json),
            Err(e) => warn!("Failed to serialize report line: {}", e),
        }
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to write report: {}", e);
        }
    }
}

pub fn format_distances(distances: &[u64]) -> String {
    format!("Distances: {:?}", distances)
}

fn format_device_row(device: &DeviceSnapshot) -> String {
    let ids = match (device.major, device.minor) {
        (Some(major), Some(minor)) => format!(" major={} minor={}", major, minor),
        _ => String::new(),
    };

    format!(
        "  {} rssi={} distance={} ({}) accuracy={:.3} readings={}{}",
        device.id,
        device.rssi,
        device.distance,
        Proximity::from_distance(device.distance),
        device.accuracy,
        device.readings,
        ids
    )
}
