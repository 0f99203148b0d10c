//! # Image Provisioning
//!
//! Ensures the toolchain image is in the runtime's local cache before the
//! first container is created from it.
//!
//! ## Cost Model
//!
//! | Situation                         | Runtime calls           |
//! |-----------------------------------|-------------------------|
//! | already ensured in this process   | none                    |
//! | present locally, first request    | one `inspect_image`     |
//! | absent locally, first request     | inspect + pull + inspect |
//!
//! Concurrent first requests for the same tag share one pull: the pull path
//! is serialized and re-checks the cache after acquiring the lock.
//!
//! Pulls are bounded by [`IMAGE_PULL_TIMEOUT`], independent of the
//! per-request compilation timeout.
//!
//! [`IMAGE_PULL_TIMEOUT`]: crate::constants::IMAGE_PULL_TIMEOUT

use crate::classify::{FailureContext, RuntimeOperation, classify};
use crate::constants::IMAGE_PULL_TIMEOUT;
use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Caches which images are known to be present locally.
pub struct ImageProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    ensured: RwLock<HashSet<String>>,
    pull_lock: Mutex<()>,
    pull_timeout: Duration,
}

impl ImageProvisioner {
    /// Creates a provisioner with the default pull ceiling.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_pull_timeout(runtime, IMAGE_PULL_TIMEOUT)
    }

    /// Creates a provisioner with a custom pull ceiling.
    pub fn with_pull_timeout(runtime: Arc<dyn ContainerRuntime>, pull_timeout: Duration) -> Self {
        Self {
            runtime,
            ensured: RwLock::new(HashSet::new()),
            pull_lock: Mutex::new(()),
            pull_timeout,
        }
    }

    /// Returns true if `image` was already ensured by this provisioner.
    pub fn is_cached(&self, image: &str) -> bool {
        self.ensured
            .read()
            .map(|set| set.contains(image))
            .unwrap_or(false)
    }

    /// Makes sure `image` exists locally, pulling it on first use.
    ///
    /// # Errors
    ///
    /// [`Error::ImageUnavailable`] if the image is absent and the pull
    /// fails or exceeds the pull ceiling.
    pub async fn ensure(&self, image: &str) -> Result<()> {
        if self.is_cached(image) {
            return Ok(());
        }

        if self.inspect(image).await? {
            self.mark(image);
            return Ok(());
        }

        let _guard = self.pull_lock.lock().await;
        if self.is_cached(image) {
            return Ok(());
        }

        info!(image, timeout = ?self.pull_timeout, "image not present locally, pulling");
        let started = Instant::now();
        match tokio::time::timeout(self.pull_timeout, self.runtime.pull_image(image)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(image, error = %e, "image pull failed");
                return Err(classify(RuntimeOperation::PullImage, &e, &context(image)));
            }
            Err(_elapsed) => {
                warn!(image, "image pull exceeded {:?}", self.pull_timeout);
                return Err(Error::ImageUnavailable {
                    image: image.to_string(),
                    reason: format!("pull did not finish within {:?}", self.pull_timeout),
                });
            }
        }

        if !self.inspect(image).await? {
            return Err(Error::ImageUnavailable {
                image: image.to_string(),
                reason: "pull reported success but image is still missing".to_string(),
            });
        }

        info!(image, elapsed = ?started.elapsed(), "image pulled");
        self.mark(image);
        Ok(())
    }

    async fn inspect(&self, image: &str) -> Result<bool> {
        match self.runtime.inspect_image(image).await {
            Ok(Some(info)) => {
                debug!(image, id = %info.id, "image present");
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(image, error = %e, "image inspect failed");
                Err(classify(RuntimeOperation::InspectImage, &e, &context(image)))
            }
        }
    }

    fn mark(&self, image: &str) {
        if let Ok(mut set) = self.ensured.write() {
            set.insert(image.to_string());
        }
    }
}

fn context(image: &str) -> FailureContext<'_> {
    FailureContext {
        target: image,
        ..Default::default()
    }
}
