use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::trace;

use crate::{
    error::{Error, Result},
    subscriber::{Delivery, MessageSink},
};

/// Stick position, each axis nominally in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JoystickSample {
    pub x: f64,
    pub y: f64,
}

impl JoystickSample {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both axes forced into [-1, 1]; a non-finite axis reads as centered.
    pub fn clamped(self) -> Self {
        fn axis(v: f64) -> f64 {
            if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 }
        }
        Self {
            x: axis(self.x),
            y: axis(self.y),
        }
    }
}

/// Latest stick position. Must never block.
pub trait JoystickSource: Send + Sync + 'static {
    fn sample(&self) -> JoystickSample;
}

/// Joystick position written by the input widget and read by the control
/// loop. Overwritten in place; there is no history.
#[derive(Debug, Clone)]
pub struct SharedJoystick {
    pose: Arc<watch::Sender<JoystickSample>>,
}

impl Default for SharedJoystick {
    fn default() -> Self {
        let (pose, _) = watch::channel(JoystickSample::default());
        Self { pose: Arc::new(pose) }
    }
}

impl SharedJoystick {
    pub fn set(&self, sample: JoystickSample) {
        self.pose.send_replace(sample);
    }

    pub fn center(&self) {
        self.set(JoystickSample::default());
    }
}

impl JoystickSource for SharedJoystick {
    fn sample(&self) -> JoystickSample {
        *self.pose.borrow()
    }
}

/// Feeds JSON `{"x": .., "y": ..}` samples from a remote widget into a
/// [`SharedJoystick`].
pub struct JoystickSink {
    joystick: SharedJoystick,
}

impl JoystickSink {
    pub fn new(joystick: SharedJoystick) -> Self {
        Self { joystick }
    }
}

impl MessageSink for JoystickSink {
    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let sample: JoystickSample = serde_json::from_slice(&delivery.payload)
            .map_err(|e| Error::message(&delivery.meta.topic, e))?;
        trace!(x = sample.x, y = sample.y, "joystick");
        self.joystick.set(sample);
        Ok(())
    }
}
