//! Core data types flowing through the streaming pipeline.
//!
//! ## Architecture
//!
//! - [`RawFrame`] is a platform camera frame before any processing
//! - [`SensorFrame`] is a throttled, JPEG-encoded frame ready for transport
//! - [`LocationFix`] is the single freshest GPS sample
//! - [`StreamEnvelope`] is the wire message fusing one frame with one fix
//! - [`ConnectionState`] and [`ReconnectState`] describe the transport session
//!
//! Frames and fixes are published as immutable `Arc` snapshots, so readers on
//! other tasks never observe a partially updated value.

mod connection;
mod envelope;
mod frame;
mod frame_rate;
mod location;

pub use connection::{ConnectionState, ReconnectState};
pub use envelope::StreamEnvelope;
pub use frame::{PixelFormat, Plane, RawFrame, SensorFrame};
pub use frame_rate::FrameRate;
pub use location::{LocationFix, PlatformFix};
