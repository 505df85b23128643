use anyhow::anyhow;
use clap::Parser;
use teleop_engine::{
    Args, bus::ZenohBus, codec::ImageCodec, config::ServiceConfigList, supervisor::Supervisor,
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("teleop_engine=info")))
        .init();

    let args = Args::parse();
    info!("Starting teleop with args: {:?}", args);

    // Configuration errors are fatal before any task starts.
    let services = ServiceConfigList::load(&args.service_config)?;
    let mut plan = services.plan(&args.camera_name)?;
    if let Some(view) = &args.view {
        plan = plan.with_initial_view(view)?;
    }
    if let Some(topic) = &args.joystick_topic {
        plan = plan.with_joystick_topic(topic);
    }
    if let Some(topic) = &args.view_topic {
        plan = plan.with_view_topic(topic);
    }

    let session = zenoh::open(args.zenoh_config()?)
        .await
        .map_err(|e| anyhow!("Failed to open Zenoh session: {}", e))?;
    let bus = ZenohBus::new(session);

    #[cfg(feature = "rerun")]
    let (display, _serve_guard) = {
        let (rr, serve_guard) = args.rerun.init("teleop")?;
        (teleop_engine::display::RerunSurface::new(rr), serve_guard)
    };
    #[cfg(not(feature = "rerun"))]
    let display = {
        let display = teleop_engine::display::SharedSurface::new();
        display.set_ready(true);
        display
    };

    let supervisor = Supervisor::new(plan, bus, display, ImageCodec);
    supervisor
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
