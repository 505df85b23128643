use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    subscriber::{Delivery, MessageSink},
};

/// The one camera view currently selected for decode and display.
///
/// Cheap to clone; every clone observes the same selection. Only the latest
/// selection is kept.
#[derive(Clone)]
pub struct ViewSelector {
    active: Arc<watch::Sender<Arc<str>>>,
}

impl ViewSelector {
    pub fn new(initial: impl Into<Arc<str>>) -> Self {
        let (active, _) = watch::channel(initial.into());
        Self {
            active: Arc::new(active),
        }
    }

    /// Select `name`. Returns `false` if it was already active.
    pub fn set_active(&self, name: &str) -> bool {
        self.active.send_if_modified(|current| {
            if current.as_ref() == name {
                false
            } else {
                *current = Arc::from(name);
                true
            }
        })
    }

    pub fn get_active(&self) -> Arc<str> {
        self.active.borrow().clone()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.borrow().as_ref() == name
    }

    /// Receiver notified on every effective switch.
    pub fn watch(&self) -> watch::Receiver<Arc<str>> {
        self.active.subscribe()
    }
}

impl std::fmt::Debug for ViewSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ViewSelector").field(&self.get_active()).finish()
    }
}

/// Applies view names published by the UI's view-switch action.
pub struct ViewSwitchSink {
    selector: ViewSelector,
    views: Vec<Arc<str>>,
}

impl ViewSwitchSink {
    pub fn new(selector: ViewSelector, views: impl IntoIterator<Item = Arc<str>>) -> Self {
        Self {
            selector,
            views: views.into_iter().collect(),
        }
    }
}

impl MessageSink for ViewSwitchSink {
    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let name = std::str::from_utf8(&delivery.payload)
            .map_err(|e| Error::message(&delivery.meta.topic, e))?
            .trim();
        if !self.views.iter().any(|v| v.as_ref() == name) {
            warn!(view = name, "ignoring switch to unknown view");
            return Ok(());
        }
        if self.selector.set_active(name) {
            info!(view = name, "active view switched");
        }
        Ok(())
    }
}
