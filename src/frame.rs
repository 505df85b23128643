use std::sync::Arc;

use tokio::task;
use tracing::trace;

use crate::{
    codec::FrameDecoder,
    display::{DecodedFrame, DisplaySurface},
    error::{Error, Result},
    messages,
    subscriber::{Delivery, MessageSink},
    view::ViewSelector,
};

/// Sink for one camera view.
///
/// Frames are decoded only while this view is active; everything else is
/// dropped undecoded. Decoding runs on the blocking pool so it cannot stall
/// the control loop. Camera subscriptions are `latest_only`, so frames that
/// arrive during a decode are collapsed to the newest one.
pub struct FrameRouter<D, C> {
    view: Arc<str>,
    selector: ViewSelector,
    decoder: Arc<C>,
    display: D,
    skipped: u64,
}

impl<D: DisplaySurface, C: FrameDecoder> FrameRouter<D, C> {
    pub fn new(view: Arc<str>, selector: ViewSelector, decoder: Arc<C>, display: D) -> Self {
        Self {
            view,
            selector,
            decoder,
            display,
            skipped: 0,
        }
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    /// Frames dropped because another view was active.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<D: DisplaySurface, C: FrameDecoder> MessageSink for FrameRouter<D, C> {
    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        if !self.selector.is_active(&self.view) {
            self.skipped += 1;
            return Ok(());
        }

        let Delivery { meta, payload } = delivery;
        let decoder = self.decoder.clone();
        let raster = task::spawn_blocking(move || {
            let image = messages::camera_payload(&meta.topic, &payload)?;
            decoder.decode(&image)
        })
        .await
        .map_err(|e| Error::Decode(format!("decoder task failed: {e}")))??;

        trace!(view = %self.view, width = raster.width, height = raster.height, "frame");
        self.display.display_frame(DecodedFrame {
            view: self.view.clone(),
            raster,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{ImageCodec, PixelFormat},
        display::SharedSurface,
        subscriber::Metadata,
    };
    use edgefirst_schemas::{builtin_interfaces::Time, sensor_msgs::CompressedImage, std_msgs::Header};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn camera_message(fill: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(2, 2, Rgb([fill, fill, fill]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::from(img).write_to(&mut png, ImageFormat::Png).unwrap();
        let msg = CompressedImage {
            header: Header {
                stamp: Time { sec: 0, nanosec: 0 },
                frame_id: "camera".into(),
            },
            format: "png".into(),
            data: png.into_inner(),
        };
        messages::encode("oak0/rgb", &msg).unwrap()
    }

    fn delivery(sequence: u64, payload: Vec<u8>) -> Delivery {
        Delivery {
            meta: Metadata {
                topic: "oak0/rgb".into(),
                sequence,
            },
            payload,
        }
    }

    fn router(view: &str, selector: &ViewSelector, surface: &SharedSurface) -> FrameRouter<SharedSurface, ImageCodec> {
        FrameRouter::new(Arc::from(view), selector.clone(), Arc::new(ImageCodec), surface.clone())
    }

    #[tokio::test]
    async fn active_view_is_decoded_and_displayed() {
        let selector = ViewSelector::new("rgb");
        let surface = SharedSurface::new();
        let mut rgb = router("rgb", &selector, &surface);

        rgb.handle(delivery(0, camera_message(7))).await.unwrap();

        let frame = surface.frame("rgb").unwrap();
        assert_eq!(frame.raster.format, PixelFormat::Rgb8);
        assert_eq!((frame.raster.width, frame.raster.height), (2, 2));
        assert_eq!(frame.raster.data[0], 7);
    }

    #[tokio::test]
    async fn inactive_view_is_not_decoded() {
        let selector = ViewSelector::new("rgb");
        let surface = SharedSurface::new();
        let mut left = router("left", &selector, &surface);

        // undecodable, but never looked at
        left.handle(delivery(0, vec![1, 2, 3])).await.unwrap();
        assert_eq!(left.skipped(), 1);
        assert!(surface.frame("left").is_none());
    }

    #[tokio::test]
    async fn switching_views_moves_decode_work() {
        let selector = ViewSelector::new("rgb");
        let surface = SharedSurface::new();
        let mut rgb = router("rgb", &selector, &surface);
        let mut left = router("left", &selector, &surface);

        rgb.handle(delivery(0, camera_message(1))).await.unwrap();
        left.handle(delivery(0, camera_message(2))).await.unwrap();

        selector.set_active("left");
        rgb.handle(delivery(1, camera_message(3))).await.unwrap();
        left.handle(delivery(1, camera_message(4))).await.unwrap();

        assert_eq!(surface.frames_shown("rgb"), 1);
        assert_eq!(rgb.skipped(), 1);
        assert_eq!(surface.frames_shown("left"), 1);
        assert_eq!(surface.frame("left").unwrap().raster.data[0], 4);
    }

    #[tokio::test]
    async fn bad_frame_does_not_block_next() {
        let selector = ViewSelector::new("rgb");
        let surface = SharedSurface::new();
        let mut rgb = router("rgb", &selector, &surface);

        let err = rgb.handle(delivery(0, vec![0xde, 0xad])).await.unwrap_err();
        assert!(err.is_recoverable());

        let corrupt_image = CompressedImage {
            header: Header {
                stamp: Time { sec: 0, nanosec: 0 },
                frame_id: "camera".into(),
            },
            format: "jpeg".into(),
            data: vec![0xFF, 0xD8, 0x00],
        };
        let bytes = messages::encode("oak0/rgb", &corrupt_image).unwrap();
        let err = rgb.handle(delivery(1, bytes)).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        rgb.handle(delivery(2, camera_message(5))).await.unwrap();
        assert_eq!(surface.frames_shown("rgb"), 1);
        assert_eq!(surface.frame("rgb").unwrap().raster.data[0], 5);
    }
}
