//! Stream-subscription and control-loop engine for a teleoperation front end.
//!
//! Camera views and vehicle state arrive as independent bus subscriptions;
//! only the active camera view is decoded and displayed, while a fixed-period
//! loop turns joystick samples into velocity commands.

pub mod bus;
pub mod codec;
pub mod config;
pub mod control;
pub mod display;
pub mod error;
pub mod frame;
pub mod joystick;
pub mod messages;
pub mod subscriber;
pub mod supervisor;
pub mod view;

use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use serde_json::json;
use zenoh::config::{Config, WhatAmI};

pub use error::{Error, Result};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Rerun parameters
    #[cfg(feature = "rerun")]
    #[command(flatten)]
    pub rerun: rerun::clap::RerunArgs,

    /// service configuration file
    #[arg(long, default_value = "/opt/teleop/config.json")]
    pub service_config: PathBuf,

    /// name of the camera service in the configuration file
    #[arg(long, default_value = "oak0")]
    pub camera_name: String,

    /// initially active view, defaults to the first configured view
    #[arg(long)]
    pub view: Option<String>,

    /// topic carrying JSON joystick samples from a remote input widget
    #[arg(long)]
    pub joystick_topic: Option<String>,

    /// topic carrying view names from the UI's view switch
    #[arg(long)]
    pub view_topic: Option<String>,

    /// zenoh connection mode
    #[arg(long, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(short, long)]
    remote: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(short, long)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long)]
    no_multicast_scouting: bool,
}

impl Args {
    pub fn zenoh_config(&self) -> anyhow::Result<Config> {
        let mut config = Config::default();

        config
            .insert_json5("mode", &json!(self.mode).to_string())
            .map_err(|e| anyhow!("Failed to set Zenoh mode: {}", e))?;

        if !self.remote.is_empty() {
            config
                .insert_json5("connect/endpoints", &json!(self.remote).to_string())
                .map_err(|e| anyhow!("Failed to set Zenoh endpoints: {}", e))?;
        }

        if !self.listen.is_empty() {
            config
                .insert_json5("listen/endpoints", &json!(self.listen).to_string())
                .map_err(|e| anyhow!("Failed to set Zenoh listen endpoints: {}", e))?;
        }

        if self.no_multicast_scouting {
            config
                .insert_json5("scouting/multicast/enabled", &json!(false).to_string())
                .map_err(|e| anyhow!("Failed to disable multicast scouting: {}", e))?;
        }

        Ok(config)
    }
}
