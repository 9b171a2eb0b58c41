use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

/// Host-side callbacks, flattened into one event stream so the viewer runtime
/// can be driven without any host runtime present. Events are applied in
/// arrival order; a broadcast may race a pending backend fetch and whichever
/// lands later wins.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Authorized {
        channel_id: String,
        token: String,
    },
    ContextChanged {
        display_resolution: Option<String>,
    },
    /// Change notification without a payload; consumers re-fetch the current
    /// slot content through [`HostPlatform::broadcaster_config`].
    ConfigChanged,
    Broadcast {
        message: String,
    },
    /// Result of the one-shot backend grimoire fetch done at connect time.
    GrimoireLoaded {
        is_active: Option<bool>,
        grimoire: Option<Value>,
    },
}

/// The host platform's durable config slot and pub/sub channel, seen from
/// this side of the boundary.
pub trait HostPlatform {
    /// Current content of the broadcaster config slot, if any was ever set.
    fn broadcaster_config(&self) -> Option<String>;

    fn set_broadcaster_config(&self, content: &str) -> Result<()>;

    fn send_broadcast(&self, message: &str) -> Result<()>;
}

/// Native stand-in for the hosted platform: the config slot is a JSON file on
/// disk and the broadcast channel fans out to connected overlay sockets.
pub struct LocalPlatform {
    store_path: PathBuf,
    broadcast_tx: broadcast::Sender<String>,
}

impl LocalPlatform {
    pub fn new(store_path: PathBuf, broadcast_tx: broadcast::Sender<String>) -> Self {
        Self {
            store_path,
            broadcast_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }
}

impl HostPlatform for LocalPlatform {
    fn broadcaster_config(&self) -> Option<String> {
        match fs::read_to_string(&self.store_path) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(?err, path = %self.store_path.display(), "failed reading config slot");
                None
            }
        }
    }

    fn set_broadcaster_config(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        fs::write(&self.store_path, content)
            .with_context(|| format!("failed writing {}", self.store_path.display()))
    }

    fn send_broadcast(&self, message: &str) -> Result<()> {
        // No subscribers is fine; an empty fan-out is not an error.
        let _ = self.broadcast_tx.send(message.to_owned());
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;

    use anyhow::Result;

    use super::HostPlatform;

    /// Records slot writes and broadcasts so editor/viewer tests can assert
    /// exactly what reached the host.
    #[derive(Debug, Default)]
    pub struct RecordingPlatform {
        pub stored: RefCell<Option<String>>,
        pub broadcasts: RefCell<Vec<String>>,
    }

    impl RecordingPlatform {
        pub fn with_stored(content: &str) -> Self {
            Self {
                stored: RefCell::new(Some(content.to_owned())),
                broadcasts: RefCell::new(Vec::new()),
            }
        }
    }

    impl HostPlatform for RecordingPlatform {
        fn broadcaster_config(&self) -> Option<String> {
            self.stored.borrow().clone()
        }

        fn set_broadcaster_config(&self, content: &str) -> Result<()> {
            *self.stored.borrow_mut() = Some(content.to_owned());
            Ok(())
        }

        fn send_broadcast(&self, message: &str) -> Result<()> {
            self.broadcasts.borrow_mut().push(message.to_owned());
            Ok(())
        }
    }
}
