//! Camera frame pipeline

pub mod codec;
pub mod producer;
pub mod throttle;

pub use codec::{FrameCodec, Rotation};
pub use producer::{FrameConsumer, FrameProducer, ProducerStats};
pub use throttle::FrameGate;
