use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;

/// Static addressing of one simulated peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device id such as `INV1`; its prefix selects the category.
    pub name: String,
    pub ip: IpAddr,
    pub send_port: u16,
    pub receive_port: u16,
    pub category: String,
}

/// A peer plus its mutable heartbeat state.
#[derive(Debug)]
pub struct Device {
    identity: DeviceIdentity,
    life: AtomicU16,
    last_seen: Mutex<Option<OffsetDateTime>>,
}

impl Device {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self::resume(identity, 0)
    }

    /// Restart the life counter from a previously persisted value.
    pub fn resume(identity: DeviceIdentity, life: u16) -> Self {
        Self {
            identity,
            life: AtomicU16::new(life),
            last_seen: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn category(&self) -> &str {
        &self.identity.category
    }

    /// Advance the life signal and return the value for the frame being built.
    /// 65535 wraps to 0.
    pub fn update_life(&self) -> u16 {
        self.life.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn life_signal(&self) -> u16 {
        self.life.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        self.touch_at(OffsetDateTime::now_utc());
    }

    pub fn touch_at(&self, at: OffsetDateTime) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn last_seen(&self) -> Option<OffsetDateTime> {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
