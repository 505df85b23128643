//! Service configuration.
//!
//! The configuration file lists named bus services, each with a key prefix
//! and a decimation factor, plus the control-loop limits. It is validated
//! into a [`TeleopPlan`] before any task is started.

use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::VelocityLimits;

pub const CANBUS_SERVICE: &str = "canbus";
pub const DEFAULT_VIEWS: [&str; 4] = ["rgb", "disparity", "left", "right"];

pub const MAX_LINEAR_VELOCITY_MPS: f64 = 0.5;
pub const MAX_ANGULAR_VELOCITY_RPS: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not find service config for {0}")]
    MissingService(String),

    #[error("service {0} has every_n = 0, must be at least 1")]
    ZeroDecimation(String),

    #[error("{name} must be positive and finite, got {value}")]
    InvalidLimit { name: &'static str, value: f64 },

    #[error("camera service {0} lists no views")]
    NoViews(String),

    #[error("view {0} is not served by the camera service")]
    UnknownView(String),

    #[error("control period must be non-zero")]
    ZeroPeriod,
}

fn default_every_n() -> u32 {
    1
}

/// One named service on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub key_prefix: String,
    #[serde(default = "default_every_n")]
    pub every_n: u32,
    /// Camera services only. Omitted means [`DEFAULT_VIEWS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<Vec<String>>,
}

impl ServiceConfig {
    pub fn topic(&self, leaf: &str) -> String {
        format!("{}/{}", self.key_prefix.trim_end_matches('/'), leaf)
    }

    fn decimation(&self) -> Result<NonZeroU32, ConfigError> {
        NonZeroU32::new(self.every_n).ok_or_else(|| ConfigError::ZeroDecimation(self.name.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub max_linear_velocity: f64,
    pub max_angular_velocity: f64,
    pub period_ms: u64,
    pub ready_poll_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_linear_velocity: MAX_LINEAR_VELOCITY_MPS,
            max_angular_velocity: MAX_ANGULAR_VELOCITY_RPS,
            period_ms: 20,
            ready_poll_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfigList {
    pub configs: Vec<ServiceConfig>,
    #[serde(default)]
    pub control: ControlConfig,
}

pub fn find_config_by_name<'a>(list: &'a ServiceConfigList, name: &str) -> Option<&'a ServiceConfig> {
    list.configs.iter().find(|config| config.name == name)
}

impl ServiceConfigList {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Resolve the camera and vehicle-control services into topics.
    pub fn plan(&self, camera_name: &str) -> Result<TeleopPlan, ConfigError> {
        let camera = find_config_by_name(self, camera_name)
            .ok_or_else(|| ConfigError::MissingService(camera_name.to_owned()))?;
        let canbus = find_config_by_name(self, CANBUS_SERVICE)
            .ok_or_else(|| ConfigError::MissingService(CANBUS_SERVICE.to_owned()))?;

        let camera_every_n = camera.decimation()?;
        let canbus_every_n = canbus.decimation()?;

        let views: Vec<&str> = match &camera.views {
            Some(views) => views.iter().map(String::as_str).collect(),
            None => DEFAULT_VIEWS.to_vec(),
        };
        let cameras = views
            .iter()
            .map(|view| CameraTopic {
                view: Arc::from(*view),
                subscription: Subscription {
                    topic: camera.topic(view),
                    every_n: camera_every_n,
                    latest_only: true,
                },
            })
            .collect::<Vec<_>>();
        let initial_view = cameras
            .first()
            .map(|c| c.view.clone())
            .ok_or_else(|| ConfigError::NoViews(camera.name.clone()))?;

        let control = &self.control;
        let limits = VelocityLimits::new(control.max_linear_velocity, control.max_angular_velocity)?;
        if control.period_ms == 0 || control.ready_poll_ms == 0 {
            return Err(ConfigError::ZeroPeriod);
        }

        Ok(TeleopPlan {
            cameras,
            state: Subscription {
                topic: canbus.topic("state"),
                every_n: canbus_every_n,
                latest_only: false,
            },
            command_topic: canbus.topic("twist"),
            limits,
            period: Duration::from_millis(control.period_ms),
            ready_poll: Duration::from_millis(control.ready_poll_ms),
            initial_view,
            joystick: None,
            view_switch: None,
        })
    }
}

/// A topic to subscribe to. Immutable once its subscriber starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    /// Deliver every Nth published message.
    pub every_n: NonZeroU32,
    /// Collapse any backlog to its newest message before handing it on.
    /// Camera views set this so a slow decode never falls behind the stream.
    pub latest_only: bool,
}

impl Subscription {
    pub fn every(topic: impl Into<String>, every_n: NonZeroU32) -> Self {
        Self {
            topic: topic.into(),
            every_n,
            latest_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraTopic {
    pub view: Arc<str>,
    pub subscription: Subscription,
}

/// Everything the supervisor needs to start its tasks.
#[derive(Debug, Clone)]
pub struct TeleopPlan {
    pub cameras: Vec<CameraTopic>,
    pub state: Subscription,
    pub command_topic: String,
    pub limits: VelocityLimits,
    pub period: Duration,
    pub ready_poll: Duration,
    pub initial_view: Arc<str>,
    pub joystick: Option<Subscription>,
    pub view_switch: Option<Subscription>,
}

impl TeleopPlan {
    pub fn views(&self) -> impl Iterator<Item = &Arc<str>> {
        self.cameras.iter().map(|c| &c.view)
    }

    pub fn with_initial_view(mut self, view: &str) -> Result<Self, ConfigError> {
        let view = self
            .views()
            .find(|v| v.as_ref() == view)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownView(view.to_owned()))?;
        self.initial_view = view;
        Ok(self)
    }

    pub fn with_joystick_topic(mut self, topic: impl Into<String>) -> Self {
        self.joystick = Some(Subscription::every(topic, NonZeroU32::MIN));
        self
    }

    pub fn with_view_topic(mut self, topic: impl Into<String>) -> Self {
        self.view_switch = Some(Subscription::every(topic, NonZeroU32::MIN));
        self
    }
}
