//! Wire messages, all CDR little-endian.

use std::fmt;

use edgefirst_schemas::{
    geometry_msgs::{Twist, Vector3},
    sensor_msgs::CompressedImage,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

pub fn encode<T: Serialize>(topic: &str, msg: &T) -> Result<Vec<u8>> {
    cdr::serialize::<_, _, cdr::CdrLe>(msg, cdr::Infinite).map_err(|e| Error::message(topic, e))
}

pub fn decode<T: DeserializeOwned>(topic: &str, bytes: &[u8]) -> Result<T> {
    cdr::deserialize::<T>(bytes).map_err(|e| Error::message(topic, e))
}

/// Image bytes carried by a camera topic.
pub fn camera_payload(topic: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    decode::<CompressedImage>(topic, bytes).map(|image| image.data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    Manual,
    Auto,
    Error,
    Unknown(u32),
}

impl From<u32> for ControlState {
    fn from(code: u32) -> Self {
        match code {
            0 => ControlState::Idle,
            1 => ControlState::Manual,
            2 => ControlState::Auto,
            3 => ControlState::Error,
            other => ControlState::Unknown(other),
        }
    }
}

impl From<ControlState> for u32 {
    fn from(state: ControlState) -> Self {
        match state {
            ControlState::Idle => 0,
            ControlState::Manual => 1,
            ControlState::Auto => 2,
            ControlState::Error => 3,
            ControlState::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlState::Idle => f.write_str("IDLE"),
            ControlState::Manual => f.write_str("MANUAL"),
            ControlState::Auto => f.write_str("AUTO"),
            ControlState::Error => f.write_str("ERROR"),
            ControlState::Unknown(_) => f.write_str("UNKNOWN"),
        }
    }
}

/// Vehicle status published on `{canbus}/state`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub control_state: u32,
    pub measured_speed: f32,
    pub measured_angular_rate: f32,
}

impl VehicleState {
    pub fn new(state: ControlState) -> Self {
        Self {
            control_state: state.into(),
            measured_speed: 0.0,
            measured_angular_rate: 0.0,
        }
    }

    pub fn control_state(&self) -> ControlState {
        ControlState::from(self.control_state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityCommand {
    pub linear_velocity_x: f64,
    pub angular_velocity: f64,
}

impl From<VelocityCommand> for Twist {
    fn from(cmd: VelocityCommand) -> Self {
        Twist {
            linear: Vector3 {
                x: cmd.linear_velocity_x,
                y: 0.0,
                z: 0.0,
            },
            angular: Vector3 {
                x: 0.0,
                y: 0.0,
                z: cmd.angular_velocity,
            },
        }
    }
}

impl From<&Twist> for VelocityCommand {
    fn from(twist: &Twist) -> Self {
        Self {
            linear_velocity_x: twist.linear.x,
            angular_velocity: twist.angular.z,
        }
    }
}
