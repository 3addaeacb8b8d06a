use serde::{Deserialize, Serialize};
use std::fmt;

/// Power state reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    /// Any other adapter-reported state (resetting, unauthorized, unsupported...).
    Other(String),
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterState::PoweredOn => write!(f, "powered on"),
            AdapterState::PoweredOff => write!(f, "powered off"),
            AdapterState::Other(state) => write!(f, "{}", state),
        }
    }
}

/// One discovery event: who sent it, the manufacturer-specific payload, and
/// the strength it was received at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub manufacturer_data: Vec<u8>,
    pub rssi: i32,
}

impl Advertisement {
    pub fn new(id: impl Into<String>, manufacturer_data: impl Into<Vec<u8>>, rssi: i32) -> Self {
        Advertisement {
            id: id.into(),
            manufacturer_data: manufacturer_data.into(),
            rssi,
        }
    }
}

/// Commands the scanner issues to the adapter. Fire-and-forget: the scanner
/// expects no acknowledgment.
pub trait Adapter: Send + Sync {
    /// Begin an unfiltered scan; all filtering happens in software.
    fn start_scanning(&self);

    fn stop_scanning(&self);
}

impl<A: Adapter + ?Sized> Adapter for std::sync::Arc<A> {
    fn start_scanning(&self) {
        (**self).start_scanning()
    }

    fn stop_scanning(&self) {
        (**self).stop_scanning()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Adapter;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Command {
        Start,
        Stop,
    }

    /// Adapter double that records the commands it receives.
    #[derive(Debug, Default)]
    pub struct RecordingAdapter {
        pub commands: Mutex<Vec<Command>>,
    }

    impl RecordingAdapter {
        pub fn commands(&self) -> Vec<Command> {
            self.commands.lock().clone()
        }
    }

    impl Adapter for RecordingAdapter {
        fn start_scanning(&self) {
            self.commands.lock().push(Command::Start);
        }

        fn stop_scanning(&self) {
            self.commands.lock().push(Command::Stop);
        }
    }
}
