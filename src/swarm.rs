use crate::device::{Device, DeviceSnapshot};
use crate::notify::{SubscriptionId, Subscribers};
use log::debug;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

struct Member {
    device: Weak<Device>,
    subscription: SubscriptionId,
}

#[derive(Default)]
struct Inner {
    members: Mutex<Vec<Member>>,
    location_subscribers: Subscribers<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for member in self.members.get_mut().drain(..) {
            if let Some(device) = member.device.upgrade() {
                device.unsubscribe_from_reading_updates(member.subscription);
            }
        }
    }
}

/// Aggregate view over the tracked devices.
///
/// Holds `Weak` references in discovery order; the scanner owns the devices.
/// A reading on any member is republished as one location update.
/// Clones share the same device list and listeners.
#[derive(Clone, Default)]
pub struct Swarm {
    inner: Arc<Inner>,
}

impl Swarm {
    pub fn new() -> Self {
        Swarm::default()
    }

    /// Track `device`. Returns false if it is already part of the swarm.
    pub fn add_device(&self, device: &Arc<Device>) -> bool {
        let mut members = self.inner.members.lock();
        let target = Arc::downgrade(device);
        if members.iter().any(|m| Weak::ptr_eq(&m.device, &target)) {
            return false;
        }

        let swarm = Arc::downgrade(&self.inner);
        let subscription = device.subscribe_to_reading_updates(move |_| {
            if let Some(inner) = swarm.upgrade() {
                inner.location_subscribers.emit(&());
            }
        });

        members.push(Member {
            device: target,
            subscription,
        });
        debug!("Swarm now tracks {} devices", members.len());
        true
    }

    /// Listener fired once per reading on any tracked device, in arrival order
    pub fn on_location_update<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.location_subscribers.subscribe(move |_| callback())
    }

    pub fn remove_location_listener(&self, id: SubscriptionId) -> bool {
        self.inner.location_subscribers.unsubscribe(id)
    }

    /// Tracked devices still alive, in insertion order
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.inner
            .members
            .lock()
            .iter()
            .filter_map(|m| m.device.upgrade())
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices().len()
    }

    pub fn distances(&self) -> Vec<u64> {
        self.devices().iter().map(|d| d.distance()).collect()
    }

    pub fn accuracies(&self) -> Vec<f64> {
        self.devices().iter().map(|d| d.accuracy()).collect()
    }

    pub fn signal_strengths(&self) -> Vec<i32> {
        self.devices().iter().map(|d| d.latest_reading()).collect()
    }

    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices().iter().map(|d| d.snapshot()).collect()
    }

    /// Device with the smallest distance estimate; earliest added wins ties
    pub fn nearest(&self) -> Option<DeviceSnapshot> {
        self.snapshot().into_iter().min_by_key(|s| s.distance)
    }

    /// Non-owning handle, for listeners that need to read the swarm back
    /// without keeping it alive.
    pub fn downgrade(&self) -> WeakSwarm {
        WeakSwarm(Arc::downgrade(&self.inner))
    }
}

#[derive(Clone)]
pub struct WeakSwarm(Weak<Inner>);

impl WeakSwarm {
    pub fn upgrade(&self) -> Option<Swarm> {
        self.0.upgrade().map(|inner| Swarm { inner })
    }
}

impl fmt::Debug for Swarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swarm")
            .field("devices", &self.device_count())
            .field("listeners", &self.inner.location_subscribers.len())
            .finish()
    }
}
