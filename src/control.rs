//! Fixed-period joystick to velocity command loop.

use std::time::Duration;

use edgefirst_schemas::geometry_msgs::Twist;
use tokio::{
    select,
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    bus::EventBus,
    config::ConfigError,
    display::{self, DisplaySurface, Telemetry},
    error::Result,
    joystick::{JoystickSample, JoystickSource},
    messages::{self, VehicleState, VelocityCommand},
    subscriber::{Delivery, MessageSink},
};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(20);
pub const DEFAULT_READY_POLL: Duration = Duration::from_millis(10);
/// Shortest period or readiness poll the loop accepts; shorter values are
/// raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityLimits {
    max_linear: f64,
    max_angular: f64,
}

impl VelocityLimits {
    pub fn new(max_linear: f64, max_angular: f64) -> std::result::Result<Self, ConfigError> {
        for (name, value) in [
            ("max_linear_velocity", max_linear),
            ("max_angular_velocity", max_angular),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidLimit { name, value });
            }
        }
        Ok(Self {
            max_linear,
            max_angular,
        })
    }

    pub fn max_linear(&self) -> f64 {
        self.max_linear
    }

    pub fn max_angular(&self) -> f64 {
        self.max_angular
    }

    /// Stick forward drives forward, stick right turns clockwise.
    pub fn command(&self, sample: JoystickSample) -> VelocityCommand {
        let sample = sample.clamped();
        VelocityCommand {
            linear_velocity_x: self.max_linear * sample.y,
            angular_velocity: self.max_angular * -sample.x,
        }
    }
}

fn format_velocity(v: f64) -> String {
    // + 0.0 folds -0.0 into 0.0
    format!("{:.4}", v + 0.0)
}

pub fn telemetry(state: Option<&VehicleState>, command: &VelocityCommand) -> Telemetry {
    Telemetry {
        state: state.map_or_else(|| "???".to_owned(), |s| s.control_state().to_string()),
        speed: format_velocity(command.linear_velocity_x),
        rate: format_velocity(command.angular_velocity),
    }
}

/// Keeps the most recent vehicle state for the control loop to display.
pub struct TelemetrySink {
    latest: watch::Sender<Option<VehicleState>>,
}

impl TelemetrySink {
    pub fn channel() -> (Self, watch::Receiver<Option<VehicleState>>) {
        let (latest, rx) = watch::channel(None);
        (Self { latest }, rx)
    }
}

impl MessageSink for TelemetrySink {
    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let state: VehicleState = messages::decode(&delivery.meta.topic, &delivery.payload)?;
        trace!(state = %state.control_state(), "vehicle state");
        self.latest.send_replace(Some(state));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPhase {
    WaitingForSurface,
    Running,
    Stopped,
}

pub struct ControlLoop<B, D, J> {
    bus: B,
    display: D,
    joystick: J,
    vehicle: watch::Receiver<Option<VehicleState>>,
    command_topic: String,
    limits: VelocityLimits,
    period: Duration,
    ready_poll: Duration,
    phase: watch::Sender<ControlPhase>,
}

impl<B, D, J> ControlLoop<B, D, J>
where
    B: EventBus,
    D: DisplaySurface,
    J: JoystickSource,
{
    pub fn new(
        bus: B,
        display: D,
        joystick: J,
        vehicle: watch::Receiver<Option<VehicleState>>,
        command_topic: impl Into<String>,
        limits: VelocityLimits,
    ) -> Self {
        let (phase, _) = watch::channel(ControlPhase::WaitingForSurface);
        Self {
            bus,
            display,
            joystick,
            vehicle,
            command_topic: command_topic.into(),
            limits,
            period: DEFAULT_PERIOD,
            ready_poll: DEFAULT_READY_POLL,
            phase,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(MIN_PERIOD);
        self
    }

    pub fn with_ready_poll(mut self, ready_poll: Duration) -> Self {
        self.ready_poll = ready_poll.max(MIN_PERIOD);
        self
    }

    pub fn phase(&self) -> watch::Receiver<ControlPhase> {
        self.phase.subscribe()
    }

    /// Runs until cancelled. Publish failures are logged and the next tick
    /// carries on; a missed command is never resent.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        if display::wait_until_ready(&self.display, self.ready_poll, &cancel).await {
            self.phase.send_replace(ControlPhase::Running);
            info!(
                topic = %self.command_topic,
                period_ms = self.period.as_millis() as u64,
                "control loop running"
            );

            let mut ticker = time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.tick().await,
                }
            }
        }
        self.phase.send_replace(ControlPhase::Stopped);
        info!("control loop stopped");
        Ok(())
    }

    async fn tick(&self) {
        let command = self.limits.command(self.joystick.sample());
        self.display
            .set_telemetry(telemetry(self.vehicle.borrow().as_ref(), &command));

        let payload = match messages::encode(&self.command_topic, &Twist::from(command)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping command: {e}");
                return;
            }
        };
        match time::timeout(self.period, self.bus.publish(&self.command_topic, payload)).await {
            Ok(Ok(())) => debug!(
                linear = command.linear_velocity_x,
                angular = command.angular_velocity,
                "command published"
            ),
            Ok(Err(e)) => warn!("{e}"),
            Err(_) => warn!(topic = %self.command_topic, "publish timed out, skipping tick"),
        }
    }
}
