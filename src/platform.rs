//! Platform sensor seams.
//!
//! The core never calls into a camera or location API directly. A thin adapter
//! outside the crate implements [`CameraPlatform`] / [`LocationPlatform`] and pushes
//! events into the observers the core registers. Registrations are scoped: the
//! [`Registration`] guard unregisters when released or dropped, so a stopped
//! component never receives another callback.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::types::{PlatformFix, RawFrame};

/// Receiver of raw camera frames.
///
/// Called on the platform's delivery thread; implementations must not block.
pub trait FrameObserver: Send + Sync + 'static {
    fn on_raw_frame(&self, frame: RawFrame);
}

/// Receiver of platform location fixes.
///
/// Called on the platform's delivery thread; implementations must not block.
pub trait LocationObserver: Send + Sync + 'static {
    fn on_location_fix(&self, fix: PlatformFix);
}

/// Platform camera pipeline
pub trait CameraPlatform: Send + Sync + 'static {
    /// Start delivering frames to `observer`, replacing any previous binding
    fn bind(&self, observer: Arc<dyn FrameObserver>) -> Result<()>;

    /// Stop delivering frames. No `on_raw_frame` call may start after this returns.
    fn unbind(&self);
}

/// Platform location service
pub trait LocationPlatform: Send + Sync + 'static {
    /// Start continuous updates to `observer`
    fn request_updates(&self, request: LocationRequest, observer: Arc<dyn LocationObserver>)
    -> Result<()>;

    /// Stop updates. No `on_location_fix` call may start after this returns.
    fn remove_updates(&self);
}

/// Accuracy/power trade-off requested from the location service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationPriority {
    HighAccuracy,
    Balanced,
}

/// Continuous location update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub priority: LocationPriority,
    /// Nominal update interval
    pub interval: Duration,
    /// Fastest acceptable update interval
    pub min_interval: Duration,
    /// Longest the platform may batch updates before delivery
    pub max_delay: Duration,
}

/// Scoped platform registration; unregisters exactly once.
pub struct Registration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }

    /// Unregister now rather than at drop
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("active", &self.release.is_some()).finish()
    }
}

/// Bind `observer` to the camera and return the guard that unbinds it
pub fn bind_camera(
    camera: Arc<dyn CameraPlatform>,
    observer: Arc<dyn FrameObserver>,
) -> Result<Registration> {
    camera.bind(observer)?;
    Ok(Registration::new(move || camera.unbind()))
}

/// Register `observer` for location updates and return the guard that removes it
pub fn register_location(
    location: Arc<dyn LocationPlatform>,
    request: LocationRequest,
    observer: Arc<dyn LocationObserver>,
) -> Result<Registration> {
    location.request_updates(request, observer)?;
    Ok(Registration::new(move || location.remove_updates()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn registration_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let registration = Registration::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registration.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_releases_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&count);
            let _registration = Registration::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
