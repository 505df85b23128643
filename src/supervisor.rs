use std::{collections::HashMap, future::Future, pin::pin, sync::Arc, time::Duration};

use tokio::{
    select,
    task::{self, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    bus::EventBus,
    codec::FrameDecoder,
    config::{Subscription, TeleopPlan},
    control::{ControlLoop, TelemetrySink},
    display::{self, DisplaySurface},
    error::{Error, Result},
    frame::FrameRouter,
    joystick::{JoystickSink, SharedJoystick},
    subscriber::{MessageSink, StreamSubscriber},
    view::{ViewSelector, ViewSwitchSink},
};

/// Owns every subscription and the control loop, and is the only thing that
/// cancels them.
pub struct Supervisor<B, D, C> {
    plan: TeleopPlan,
    bus: B,
    display: D,
    decoder: Arc<C>,
    joystick: SharedJoystick,
    selector: ViewSelector,
    cancel: CancellationToken,
}

impl<B, D, C> Supervisor<B, D, C>
where
    B: EventBus,
    D: DisplaySurface,
    C: FrameDecoder,
{
    pub fn new(plan: TeleopPlan, bus: B, display: D, decoder: C) -> Self {
        let selector = ViewSelector::new(plan.initial_view.clone());
        Self {
            plan,
            bus,
            display,
            decoder: Arc::new(decoder),
            joystick: SharedJoystick::default(),
            selector,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for the input widget to write stick positions into.
    pub fn joystick(&self) -> SharedJoystick {
        self.joystick.clone()
    }

    /// Handle for the UI's view-switch action.
    pub fn selector(&self) -> ViewSelector {
        self.selector.clone()
    }

    /// Cancelling this token has the same effect as `shutdown` resolving.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start all tasks and wait until `shutdown` resolves or a task fails.
    /// Either way every task is cancelled and awaited before returning; the
    /// first failure is returned.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut tasks = Tasks::default();
        self.spawn_all(&mut tasks);
        info!(tasks = tasks.set.len(), view = %self.selector.get_active(), "teleop started");

        let mut shutdown = pin!(shutdown);
        let mut failure = None;
        loop {
            select! {
                _ = &mut shutdown, if !self.cancel.is_cancelled() => {
                    info!("shutdown requested");
                    self.cancel.cancel();
                }
                joined = tasks.set.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((id, Ok(())))) => debug!(task = tasks.name(id), "task exited"),
                    Some(Ok((id, Err(e)))) => {
                        error!(task = tasks.name(id), "{e}");
                        failure.get_or_insert(e);
                        self.cancel.cancel();
                    }
                    Some(Err(e)) => {
                        let name = tasks.name(e.id()).to_owned();
                        error!(task = %name, "task aborted: {e}");
                        failure.get_or_insert(Error::Task {
                            name,
                            reason: e.to_string(),
                        });
                        self.cancel.cancel();
                    }
                },
            }
        }

        info!("teleop stopped");
        failure.map_or(Ok(()), Err)
    }

    fn spawn_all(&self, tasks: &mut Tasks) {
        let poll = self.plan.ready_poll;

        for camera in &self.plan.cameras {
            let router = FrameRouter::new(
                camera.view.clone(),
                self.selector.clone(),
                self.decoder.clone(),
                self.display.clone(),
            );
            self.spawn_stream(tasks, format!("camera/{}", camera.view), camera.subscription.clone(), router);
        }

        let (telemetry, vehicle) = TelemetrySink::channel();
        self.spawn_stream(tasks, "vehicle-state".into(), self.plan.state.clone(), telemetry);

        if let Some(subscription) = &self.plan.joystick {
            let sink = JoystickSink::new(self.joystick.clone());
            self.spawn_stream(tasks, "ui/joystick".into(), subscription.clone(), sink);
        }
        if let Some(subscription) = &self.plan.view_switch {
            let sink = ViewSwitchSink::new(self.selector.clone(), self.plan.views().cloned());
            self.spawn_stream(tasks, "ui/view".into(), subscription.clone(), sink);
        }

        let control = ControlLoop::new(
            self.bus.clone(),
            self.display.clone(),
            self.joystick.clone(),
            vehicle,
            self.plan.command_topic.clone(),
            self.plan.limits,
        )
        .with_period(self.plan.period)
        .with_ready_poll(poll);
        tasks.spawn("control".into(), control.run(self.cancel.clone()));
    }

    fn spawn_stream<K: MessageSink>(
        &self,
        tasks: &mut Tasks,
        name: String,
        subscription: Subscription,
        sink: K,
    ) {
        let bus = self.bus.clone();
        let display = self.display.clone();
        let cancel = self.cancel.clone();
        let poll = self.plan.ready_poll;
        tasks.spawn(name, stream_task(bus, display, subscription, sink, poll, cancel));
    }
}

/// Running tasks and the name each was started under.
#[derive(Default)]
struct Tasks {
    set: JoinSet<Result<()>>,
    names: HashMap<task::Id, String>,
}

impl Tasks {
    fn spawn(&mut self, name: String, task: impl Future<Output = Result<()>> + Send + 'static) {
        let handle = self.set.spawn(task);
        self.names.insert(handle.id(), name);
    }

    fn name(&self, id: task::Id) -> &str {
        self.names.get(&id).map_or("?", String::as_str)
    }
}

async fn stream_task<B, D, K>(
    bus: B,
    display: D,
    subscription: Subscription,
    sink: K,
    ready_poll: Duration,
    cancel: CancellationToken,
) -> Result<()>
where
    B: EventBus,
    D: DisplaySurface,
    K: MessageSink,
{
    if !display::wait_until_ready(&display, ready_poll, &cancel).await {
        return Ok(());
    }
    let subscriber = select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        subscriber = StreamSubscriber::open(&bus, subscription) => subscriber?,
    };
    subscriber.run(sink, cancel).await
}
