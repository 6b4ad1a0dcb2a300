//! Location sampler: keeps the single freshest position fix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::log_sink::LogSink;
use crate::platform::{LocationObserver, LocationPlatform, LocationRequest, Registration};
use crate::types::{LocationFix, PlatformFix};
use crate::{Result, platform};

/// Publishes the latest [`LocationFix`] delivered by the platform.
///
/// `start()` and `stop()` are idempotent. Fixes delivered outside a running
/// registration are ignored.
pub struct LocationSampler {
    platform: Arc<dyn LocationPlatform>,
    request: LocationRequest,
    publisher: Arc<FixPublisher>,
    registration: Mutex<Option<Registration>>,
    authorized_tx: watch::Sender<bool>,
    log: LogSink,
}

/// Observer handed to the platform; the only writer of the fix channel.
struct FixPublisher {
    active: AtomicBool,
    fix_tx: watch::Sender<Option<LocationFix>>,
}

impl LocationObserver for FixPublisher {
    fn on_location_fix(&self, fix: PlatformFix) {
        if !self.active.load(Ordering::Acquire) {
            trace!("Ignoring location fix delivered after stop");
            return;
        }
        let fix = LocationFix::from(fix);
        trace!(lat = fix.latitude, lon = fix.longitude, accuracy = fix.accuracy, "Location fix");
        self.fix_tx.send_replace(Some(fix));
    }
}

impl LocationSampler {
    pub fn new(platform: Arc<dyn LocationPlatform>, request: LocationRequest, log: LogSink) -> Self {
        let (fix_tx, _) = watch::channel(None);
        let (authorized_tx, _) = watch::channel(false);
        Self {
            platform,
            request,
            publisher: Arc::new(FixPublisher { active: AtomicBool::new(false), fix_tx }),
            registration: Mutex::new(None),
            authorized_tx,
            log,
        }
    }

    /// Begin receiving location updates. No-op if already started.
    pub fn start(&self) -> Result<()> {
        let mut registration = self.lock_registration();
        if registration.is_some() {
            debug!("Location sampler already started");
            return Ok(());
        }

        self.publisher.active.store(true, Ordering::Release);
        let observer: Arc<dyn LocationObserver> = self.publisher.clone();
        match platform::register_location(Arc::clone(&self.platform), self.request, observer) {
            Ok(guard) => {
                *registration = Some(guard);
                self.authorized_tx.send_replace(true);
                info!(interval = ?self.request.interval, "Location updates started");
                self.log.append("Location updates started");
                Ok(())
            }
            Err(e) => {
                self.publisher.active.store(false, Ordering::Release);
                self.log.append_at(tracing::Level::WARN, format!("Location start failed: {}", e));
                Err(e)
            }
        }
    }

    /// Stop receiving updates and unregister from the platform. No-op if stopped.
    pub fn stop(&self) {
        let guard = self.lock_registration().take();
        if let Some(guard) = guard {
            self.publisher.active.store(false, Ordering::Release);
            guard.release();
            info!("Location updates stopped");
            self.log.append("Location updates stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_registration().is_some()
    }

    /// Latest fix, if any has been delivered
    pub fn latest(&self) -> Option<LocationFix> {
        *self.publisher.fix_tx.borrow()
    }

    /// Subscribe to fix updates
    pub fn subscribe(&self) -> watch::Receiver<Option<LocationFix>> {
        self.publisher.fix_tx.subscribe()
    }

    /// True once updates were successfully requested
    pub fn authorized(&self) -> watch::Receiver<bool> {
        self.authorized_tx.subscribe()
    }

    fn lock_registration(&self) -> std::sync::MutexGuard<'_, Option<Registration>> {
        self.registration.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for LocationSampler {
    fn drop(&mut self) {
        self.stop();
    }
}
