//! Display surface seam.
//!
//! Frames and telemetry are written last-write-wins; a surface never queues.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{select, sync::watch, time};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::Raster;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub view: Arc<str>,
    pub raster: Raster,
}

/// Display-only vehicle status text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub state: String,
    pub speed: String,
    pub rate: String,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            state: "???".into(),
            speed: "???".into(),
            rate: "???".into(),
        }
    }
}

pub trait DisplaySurface: Clone + Send + Sync + 'static {
    fn is_ready(&self) -> bool;

    /// Replace whatever `frame.view` last showed.
    fn display_frame(&self, frame: DecodedFrame);

    fn set_telemetry(&self, telemetry: Telemetry);
}

/// Poll `display` every `interval` until it is ready. Returns `false` if
/// cancelled first.
pub async fn wait_until_ready<D: DisplaySurface>(
    display: &D,
    interval: Duration,
    cancel: &CancellationToken,
) -> bool {
    let mut polls = 0u64;
    while !display.is_ready() {
        select! {
            _ = cancel.cancelled() => return false,
            _ = time::sleep(interval) => polls += 1,
        }
    }
    if polls > 0 {
        debug!(polls, "display surface ready");
    }
    !cancel.is_cancelled()
}

#[derive(Debug)]
struct FrameSlot {
    latest: DecodedFrame,
    shown: u64,
}

#[derive(Debug)]
struct Fields {
    ready: AtomicBool,
    frames: Mutex<HashMap<Arc<str>, FrameSlot>>,
    telemetry: watch::Sender<Telemetry>,
}

/// In-memory surface made of plain observable fields. A UI layer reads the
/// latest frame per view and the telemetry text from here.
#[derive(Debug, Clone)]
pub struct SharedSurface {
    fields: Arc<Fields>,
}

impl Default for SharedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSurface {
    pub fn new() -> Self {
        let (telemetry, _) = watch::channel(Telemetry::default());
        Self {
            fields: Arc::new(Fields {
                ready: AtomicBool::new(false),
                frames: Mutex::new(HashMap::new()),
                telemetry,
            }),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.fields.ready.store(ready, Ordering::Release);
    }

    pub fn frame(&self, view: &str) -> Option<DecodedFrame> {
        self.frames().get(view).map(|slot| slot.latest.clone())
    }

    /// Number of frames handed to `view` so far.
    pub fn frames_shown(&self, view: &str) -> u64 {
        self.frames().get(view).map_or(0, |slot| slot.shown)
    }

    pub fn telemetry(&self) -> Telemetry {
        self.fields.telemetry.borrow().clone()
    }

    pub fn watch_telemetry(&self) -> watch::Receiver<Telemetry> {
        self.fields.telemetry.subscribe()
    }

    fn frames(&self) -> std::sync::MutexGuard<'_, HashMap<Arc<str>, FrameSlot>> {
        self.fields.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplaySurface for SharedSurface {
    fn is_ready(&self) -> bool {
        self.fields.ready.load(Ordering::Acquire)
    }

    fn display_frame(&self, frame: DecodedFrame) {
        let mut frames = self.frames();
        match frames.get_mut(&frame.view) {
            Some(slot) => {
                slot.latest = frame;
                slot.shown += 1;
            }
            None => {
                frames.insert(frame.view.clone(), FrameSlot { latest: frame, shown: 1 });
            }
        }
    }

    fn set_telemetry(&self, telemetry: Telemetry) {
        self.fields.telemetry.send_if_modified(|current| {
            if *current == telemetry {
                false
            } else {
                *current = telemetry;
                true
            }
        });
    }
}

#[cfg(feature = "rerun")]
pub use rerun_surface::RerunSurface;

#[cfg(feature = "rerun")]
mod rerun_surface {
    use rerun::{Image, RecordingStream, TextLog};
    use tracing::warn;

    use super::{DecodedFrame, DisplaySurface, Telemetry};
    use crate::codec::PixelFormat;

    /// Logs frames under `camera/{view}` and telemetry as a text log.
    #[derive(Clone)]
    pub struct RerunSurface {
        rr: RecordingStream,
    }

    impl RerunSurface {
        pub fn new(rr: RecordingStream) -> Self {
            Self { rr }
        }
    }

    impl DisplaySurface for RerunSurface {
        fn is_ready(&self) -> bool {
            self.rr.is_enabled()
        }

        fn display_frame(&self, frame: DecodedFrame) {
            let DecodedFrame { view, raster } = frame;
            let size = [raster.width, raster.height];
            let image = match raster.format {
                PixelFormat::Rgb8 => Image::from_rgb24(raster.data, size),
                PixelFormat::Luma8 => Image::from_l8(raster.data, size),
            };
            if let Err(e) = self.rr.log(format!("camera/{view}"), &image) {
                warn!(%view, "failed to log frame: {e:?}");
            }
        }

        fn set_telemetry(&self, telemetry: Telemetry) {
            let text = format!(
                "{} speed={} rate={}",
                telemetry.state, telemetry.speed, telemetry.rate
            );
            if let Err(e) = self.rr.log("telemetry", &TextLog::new(text)) {
                warn!("failed to log telemetry: {e:?}");
            }
        }
    }
}
