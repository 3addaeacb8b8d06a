use crate::adapter::{Adapter, AdapterState, Advertisement};
use crate::device::{Device, DeviceSettings};
use crate::error::Error;
use crate::filter::AdvertisementFilter;
use crate::notify::{SubscriptionId, Subscribers};
use log::{error, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Scanner lifecycle, driven by adapter state reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// No adapter state seen yet
    #[default]
    Idle,
    /// Adapter powered on and told to scan
    Scanning,
    /// Adapter reported some other state and was told to stop
    Stopped,
    PoweredOff,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Stopped => "stopped",
            ScanState::PoweredOff => "powered off",
        };
        f.write_str(s)
    }
}

/// What `on_discovered` did with an advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Rejected by the filter, nothing changed
    Filtered,
    /// Reading appended to a known device
    Updated,
    /// First sighting; new-device subscribers were notified
    NewDevice,
}

/// Device registry fed by the adapter's discovery stream.
///
/// Owns every [`Device`] it creates for the lifetime of the scan session.
/// Filtering happens here, in software, against the advertisement's
/// manufacturer data.
pub struct Scanner<A: Adapter> {
    adapter: A,
    filter: AdvertisementFilter,
    settings: DeviceSettings,
    devices: Mutex<HashMap<String, Arc<Device>>>,
    state: Mutex<ScanState>,
    new_device_subscribers: Subscribers<Arc<Device>>,
    error_subscribers: Subscribers<Error>,
}

impl<A: Adapter> Scanner<A> {
    /// `filter` is a hex string matched against the hex encoding of each
    /// advertisement's manufacturer data. Empty accepts everything.
    pub fn new(adapter: A, filter: &str, settings: DeviceSettings) -> Self {
        Scanner {
            adapter,
            filter: AdvertisementFilter::new(filter),
            settings,
            devices: Mutex::new(HashMap::new()),
            state: Mutex::new(ScanState::Idle),
            new_device_subscribers: Subscribers::new(),
            error_subscribers: Subscribers::new(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn filter(&self) -> &AdvertisementFilter {
        &self.filter
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    /// Register an error listener. With none registered, adapter errors
    /// are fatal.
    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_subscribers.subscribe(callback)
    }

    pub fn remove_error_listener(&self, id: SubscriptionId) -> bool {
        self.error_subscribers.unsubscribe(id)
    }

    /// Register a listener called once per newly discovered device
    pub fn on_new_device_scanned<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Arc<Device>) + Send + Sync + 'static,
    {
        self.new_device_subscribers.subscribe(callback)
    }

    pub fn remove_new_device_listener(&self, id: SubscriptionId) -> bool {
        self.new_device_subscribers.unsubscribe(id)
    }

    pub fn on_adapter_state_changed(&self, state: AdapterState) {
        info!("Adapter state: {}", state);

        match state {
            AdapterState::PoweredOn => {
                *self.state.lock() = ScanState::Scanning;
                info!("Scanning...");
                self.adapter.start_scanning();
            }
            AdapterState::PoweredOff => {
                *self.state.lock() = ScanState::PoweredOff;
                self.emit_error(Error::AdapterUnavailable(
                    "Bluetooth is powered off".to_string(),
                ));
            }
            AdapterState::Other(_) => {
                *self.state.lock() = ScanState::Stopped;
                self.adapter.stop_scanning();
            }
        }
    }

    /// Handle one discovery event from the adapter.
    ///
    /// Repeated events for the same id never create a second device and never
    /// re-fire the new-device notification.
    pub fn on_discovered(&self, advertisement: Advertisement) -> Discovery {
        if !self.filter.matches(&advertisement.manufacturer_data) {
            trace!("Filtered advertisement from {}", advertisement.id);
            return Discovery::Filtered;
        }

        // lookup-or-create under one lock; listeners run after it is released
        let (device, is_new) = {
            let mut devices = self.devices.lock();
            if let Some(device) = devices.get(&advertisement.id) {
                (Arc::clone(device), false)
            } else {
                let device = Arc::new(Device::new(&advertisement, &self.settings));
                devices.insert(advertisement.id.clone(), Arc::clone(&device));
                (device, true)
            }
        };

        if is_new {
            info!("New device: {}", device);
            self.new_device_subscribers.emit(&device);
            return Discovery::NewDevice;
        }

        device.add_reading(advertisement.rssi);
        Discovery::Updated
    }

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.lock().get(id).cloned()
    }

    /// All known devices, in no particular order
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.lock().values().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// Stop the adapter if it is scanning and drop every listener. Known
    /// devices stay readable. Safe to call more than once.
    pub fn shutdown(&self) {
        let was_scanning = {
            let mut state = self.state.lock();
            let was_scanning = *state == ScanState::Scanning;
            if was_scanning {
                *state = ScanState::Stopped;
            }
            was_scanning
        };

        if was_scanning {
            self.adapter.stop_scanning();
        }
        self.new_device_subscribers.clear();
        self.error_subscribers.clear();
        info!("Scanner shut down with {} devices", self.device_count());
    }

    fn emit_error(&self, err: Error) {
        if self.error_subscribers.is_empty() {
            error!("No error callbacks registered, but error occurred: {}", err);
            panic!("No error callbacks registered, but error occurred: {}", err);
        }

        warn!("{}", err);
        self.error_subscribers.emit(&err);
    }
}

impl<A: Adapter> fmt::Debug for Scanner<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("filter", &self.filter)
            .field("state", &self.state())
            .field("devices", &self.device_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::{Command, RecordingAdapter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scanner(filter: &str) -> Scanner<Arc<RecordingAdapter>> {
        Scanner::new(
            Arc::new(RecordingAdapter::default()),
            filter,
            DeviceSettings::default(),
        )
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (c.clone(), c)
    }

    #[test]
    fn test_repeated_discovery_creates_one_device() {
        let s = scanner("");
        let (new_devices, nd) = counter();
        let (updates, up) = counter();

        s.on_new_device_scanned(move |device| {
            nd.fetch_add(1, Ordering::SeqCst);
            let up = up.clone();
            device.subscribe_to_reading_updates(move |_| {
                up.fetch_add(1, Ordering::SeqCst);
            });
        });

        let n = 5;
        let mut outcomes = Vec::new();
        for i in 0..n {
            outcomes.push(s.on_discovered(Advertisement::new("aa", vec![0xde, 0xad], -60 - i)));
        }

        assert_eq!(outcomes[0], Discovery::NewDevice);
        assert!(outcomes[1..].iter().all(|o| *o == Discovery::Updated));
        assert_eq!(s.device_count(), 1);
        assert_eq!(new_devices.load(Ordering::SeqCst), 1);
        // the seed reading is not an update
        assert_eq!(updates.load(Ordering::SeqCst), (n - 1) as usize);
        assert_eq!(s.device("aa").unwrap().latest_reading(), -64);
    }

    #[test]
    fn test_filtered_advertisement_is_discarded() {
        let s = scanner("face");
        let (new_devices, nd) = counter();
        s.on_new_device_scanned(move |_| {
            nd.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = s.on_discovered(Advertisement::new("aa", vec![0xde, 0xad, 0xbe, 0xef], -60));
        assert_eq!(outcome, Discovery::Filtered);
        assert_eq!(s.device_count(), 0);
        assert_eq!(new_devices.load(Ordering::SeqCst), 0);

        let outcome = s.on_discovered(Advertisement::new("bb", vec![0xfa, 0xce], -60));
        assert_eq!(outcome, Discovery::NewDevice);
        assert_eq!(new_devices.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_device_listeners_in_registration_order() {
        let s = scanner("");
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = order.clone();
            s.on_new_device_scanned(move |d| order.lock().push((tag, d.id().to_string())));
        }

        s.on_discovered(Advertisement::new("x", vec![], -50));
        assert_eq!(
            *order.lock(),
            vec![(0, "x".to_string()), (1, "x".to_string()), (2, "x".to_string())]
        );
    }

    #[test]
    fn test_powered_on_starts_scanning() {
        let s = scanner("");
        assert_eq!(s.state(), ScanState::Idle);

        s.on_adapter_state_changed(AdapterState::PoweredOn);
        assert_eq!(s.state(), ScanState::Scanning);
        assert_eq!(s.adapter().commands(), vec![Command::Start]);

        s.on_adapter_state_changed(AdapterState::Other("resetting".into()));
        assert_eq!(s.state(), ScanState::Stopped);
        assert_eq!(s.adapter().commands(), vec![Command::Start, Command::Stop]);
    }

    #[test]
    #[should_panic(expected = "No error callbacks registered")]
    fn test_powered_off_without_error_listener_is_fatal() {
        let s = scanner("");
        s.on_adapter_state_changed(AdapterState::PoweredOff);
    }

    #[test]
    #[should_panic(expected = "No error callbacks registered")]
    fn test_removing_last_error_listener_makes_errors_fatal_again() {
        let s = scanner("");
        let id = s.on_error(|_| {});
        assert!(s.remove_error_listener(id));
        assert!(!s.remove_error_listener(id));
        s.on_adapter_state_changed(AdapterState::PoweredOff);
    }

    #[test]
    fn test_removed_new_device_listener_is_not_called() {
        let s = scanner("");
        let (removed, r) = counter();
        let (kept, k) = counter();
        let id = s.on_new_device_scanned(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        s.on_new_device_scanned(move |_| {
            k.fetch_add(1, Ordering::SeqCst);
        });

        s.on_discovered(Advertisement::new("aa", vec![], -60));
        assert!(s.remove_new_device_listener(id));
        s.on_discovered(Advertisement::new("bb", vec![], -60));

        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(kept.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_powered_off_with_error_listener() {
        let s = scanner("");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        s.on_error(move |err| e.lock().push(err.to_string()));

        s.on_adapter_state_changed(AdapterState::PoweredOff);

        assert_eq!(s.state(), ScanState::PoweredOff);
        assert_eq!(
            *errors.lock(),
            vec!["Bluetooth adapter unavailable: Bluetooth is powered off".to_string()]
        );
        // scanner keeps working
        assert_eq!(
            s.on_discovered(Advertisement::new("aa", vec![], -60)),
            Discovery::NewDevice
        );
    }

    #[test]
    fn test_shutdown() {
        let s = scanner("");
        s.on_error(|_| {});
        s.on_adapter_state_changed(AdapterState::PoweredOn);
        s.on_discovered(Advertisement::new("aa", vec![], -60));

        s.shutdown();
        s.shutdown();

        assert_eq!(s.state(), ScanState::Stopped);
        assert_eq!(s.adapter().commands(), vec![Command::Start, Command::Stop]);
        assert_eq!(s.device_count(), 1);
    }

    #[test]
    fn test_concurrent_discovery_of_same_identity() {
        let s = scanner("");
        let (new_devices, nd) = counter();
        s.on_new_device_scanned(move |_| {
            nd.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::scope(|scope| {
            for t in 0..8 {
                let s = &s;
                scope.spawn(move || {
                    for i in 0..50 {
                        s.on_discovered(Advertisement::new("same", vec![], -40 - t - i));
                    }
                });
            }
        });

        assert_eq!(s.device_count(), 1);
        assert_eq!(new_devices.load(Ordering::SeqCst), 1);
        assert_eq!(s.device("same").unwrap().reading_count(), 400);
    }
}
