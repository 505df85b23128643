#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use edgefirst_schemas::{builtin_interfaces::Time, sensor_msgs::CompressedImage, std_msgs::Header};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use teleop_engine::{
    Error, Result,
    bus::{Envelope, EventBus, MessageSource},
    config::{ServiceConfigList, TeleopPlan},
    messages,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct Routes {
    topics: HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>,
}

/// In-process bus: every publish fans out to the current subscribers of the
/// exact topic.
#[derive(Clone, Default)]
pub struct MemoryBus {
    routes: Arc<Mutex<Routes>>,
    live: Arc<AtomicUsize>,
}

pub struct MemorySubscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Envelope>,
    live: Arc<AtomicUsize>,
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MessageSource for MemorySubscription {
    async fn recv(&mut self) -> Result<Envelope> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::connection(&self.topic, "bus dropped topic"))
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>> {
        match self.rx.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(Error::connection(&self.topic, "bus dropped topic"))
            }
        }
    }
}

impl EventBus for MemoryBus {
    type Subscription = MemorySubscription;

    async fn subscribe(&self, topic: &str) -> Result<MemorySubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .unwrap()
            .topics
            .entry(topic.to_owned())
            .or_default()
            .push(tx);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySubscription {
            topic: topic.to_owned(),
            rx,
            live: self.live.clone(),
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.put(topic, payload);
        Ok(())
    }
}

impl MemoryBus {
    pub fn put(&self, topic: &str, payload: Vec<u8>) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(subscribers) = routes.topics.get_mut(topic) {
            subscribers.retain(|tx| {
                tx.send(Envelope {
                    topic: topic.to_owned(),
                    payload: payload.clone(),
                })
                .is_ok()
            });
        }
    }

    /// Drop the topic so its subscribers see a connection failure.
    pub fn disconnect(&self, topic: &str) {
        self.routes.lock().unwrap().topics.remove(topic);
    }

    pub fn subscribers(&self, topic: &str) -> usize {
        self.routes
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Subscriptions not yet released.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub async fn wait_for_subscriber(&self, topic: &str) {
        eventually(|| self.subscribers(topic) > 0).await;
    }
}

pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn plan(max_linear: f64, max_angular: f64) -> TeleopPlan {
    let json = format!(
        r#"{{
            "configs": [
                {{ "name": "oak0", "key_prefix": "oak0" }},
                {{ "name": "canbus", "key_prefix": "canbus" }}
            ],
            "control": {{
                "max_linear_velocity": {max_linear},
                "max_angular_velocity": {max_angular},
                "period_ms": 5,
                "ready_poll_ms": 2
            }}
        }}"#
    );
    let services: ServiceConfigList = serde_json::from_str(&json).unwrap();
    services.plan("oak0").unwrap()
}

pub fn camera_frame(fill: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb([fill, fill, fill]));
    let mut png = Cursor::new(Vec::new());
    DynamicImage::from(img).write_to(&mut png, ImageFormat::Png).unwrap();
    camera_message(png.into_inner())
}

pub fn camera_message(data: Vec<u8>) -> Vec<u8> {
    let msg = CompressedImage {
        header: Header {
            stamp: Time { sec: 0, nanosec: 0 },
            frame_id: "oak0".into(),
        },
        format: "png".into(),
        data,
    };
    messages::encode("camera", &msg).unwrap()
}
