//! Manifest bootstrap.
//!
//! Fetches a model's `scene.json` on the Tokio runtime and hands it to the
//! frame loop over an `async_channel`. All sector loading afterwards is done
//! by the streamer.

use std::path::PathBuf;

use cadstream::{FileFetcher, HttpFetcher, ModelId, NoCache};
use serde_json::Value;
use tokio::runtime::Handle;

/// Where a model's files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A local directory laid out as `<model>/<revision>/<file>`.
    Directory(PathBuf),
    /// An HTTP base URL with the same layout.
    Http(String),
}

impl ModelSource {
    /// URLs with an `http` or `https` scheme are remote, anything else is a
    /// directory.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            Self::Http(source.to_owned())
        } else {
            Self::Directory(PathBuf::from(source))
        }
    }
}

/// In-flight manifest fetch.
pub struct ManifestLoader {
    model: ModelId,
    rx: async_channel::Receiver<cadstream::Result<Value>>,
    done: bool,
}

impl ManifestLoader {
    /// Start fetching the manifest of `model` from `source`.
    pub fn start(runtime: &Handle, source: &ModelSource, model: ModelId) -> Self {
        let (tx, rx) = async_channel::bounded(1);
        let source = source.clone();

        runtime.spawn(async move {
            let result = match &source {
                ModelSource::Directory(root) => FileFetcher::new(root).fetch_manifest(model).await,
                ModelSource::Http(url) => {
                    HttpFetcher::with_cache(url.as_str(), NoCache)
                        .fetch_manifest(model)
                        .await
                }
            };
            let _ = tx.send(result).await;
        });

        tracing::info!("Started loading manifest for model {}", model);
        Self {
            model,
            rx,
            done: false,
        }
    }

    /// Poll the fetch. Returns the result once, then `None`.
    pub fn poll(&mut self) -> Option<cadstream::Result<Value>> {
        if self.done {
            return None;
        }
        let Ok(result) = self.rx.try_recv() else {
            return None;
        };
        self.done = true;
        match &result {
            Ok(_) => tracing::info!("Loaded manifest for model {}", self.model),
            Err(e) => tracing::error!("Failed to load manifest for model {}: {}", self.model, e),
        }
        Some(result)
    }
}
