//! Gets artifacts to the requester through an ordered list of channels.
//!
//! Each enabled channel is tried in priority order (routed link, upload API,
//! native attachment) until one succeeds. Artifacts are independent: running
//! out of channels for one never stops the next.

use crate::config::DeliveryConfig;
use crate::messaging::{Attachment, AttachmentKind, Messenger, Reply};
use crate::storage::{ConversationKind, DeliveryTarget};
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    RoutedLink,
    UploadApi,
    Native,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::RoutedLink => "routed-link",
            ChannelKind::UploadApi => "upload-api",
            ChannelKind::Native => "native",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("{} is outside the served root {}", .path.display(), .root.display())]
    PathTraversal { path: PathBuf, root: PathBuf },

    #[error("{channel} channel unavailable: {reason}")]
    ChannelUnavailable { channel: ChannelKind, reason: String },

    #[error("every enabled channel failed")]
    AllChannelsExhausted,

    #[error("file does not exist or is not a regular file")]
    MissingArtifact,

    #[error("delivery setup failed: {0}")]
    Setup(String),
}

impl DeliveryError {
    fn unavailable(channel: ChannelKind, reason: impl fmt::Display) -> Self {
        DeliveryError::ChannelUnavailable {
            channel,
            reason: reason.to_string(),
        }
    }
}

/// One channel attempt for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub channel: ChannelKind,
    pub success: bool,
    pub error: Option<DeliveryError>,
}

/// Everything the router did for one artifact.
#[derive(Debug, Clone)]
pub struct ArtifactDelivery {
    pub path: PathBuf,
    pub attempts: Vec<DeliveryOutcome>,
    pub delivered_via: Option<ChannelKind>,
    pub error: Option<DeliveryError>,
}

impl ArtifactDelivery {
    pub fn delivered(&self) -> bool {
        self.delivered_via.is_some()
    }

    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn attempt(&self, artifact: &Path, target: &DeliveryTarget) -> Result<(), DeliveryError>;
}

/// A file resolved inside the served root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedPath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Resolves `candidate` (absolute, or relative to `root`) and checks it stays inside `root`.
///
/// Both sides are canonicalized, so `..` segments and symlinks pointing out of
/// the root are rejected.
pub fn resolve_served_path(root: &Path, candidate: &Path) -> Result<ServedPath, DeliveryError> {
    let traversal = || DeliveryError::PathTraversal {
        path: candidate.to_path_buf(),
        root: root.to_path_buf(),
    };

    let root = fs::canonicalize(root).map_err(|_| traversal())?;
    let absolute = fs::canonicalize(root.join(candidate)).map_err(|_| DeliveryError::MissingArtifact)?;
    let relative = absolute.strip_prefix(&root).map_err(|_| traversal())?.to_path_buf();

    Ok(ServedPath { absolute, relative })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Publishes the file as a `/files/...` URL on the local file server.
pub struct RoutedLinkChannel {
    served_root: PathBuf,
    host: String,
    port: u16,
    messenger: Arc<dyn Messenger>,
    timeout: Duration,
}

impl RoutedLinkChannel {
    pub fn new(
        served_root: PathBuf,
        host: String,
        port: u16,
        messenger: Arc<dyn Messenger>,
        timeout: Duration,
    ) -> Self {
        Self {
            served_root,
            host,
            port,
            messenger,
            timeout,
        }
    }

    pub fn link_for(&self, artifact: &Path) -> Result<String, DeliveryError> {
        let served = resolve_served_path(&self.served_root, artifact)?;

        let mut url = Url::parse(&format!("http://{}:{}/", self.host, self.port))
            .map_err(|e| DeliveryError::unavailable(ChannelKind::RoutedLink, e))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DeliveryError::unavailable(ChannelKind::RoutedLink, "base URL cannot carry a path"))?;
            segments.pop_if_empty().push("files");
            for component in served.relative.components() {
                segments.push(&component.as_os_str().to_string_lossy());
            }
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl Channel for RoutedLinkChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::RoutedLink
    }

    async fn attempt(&self, artifact: &Path, target: &DeliveryTarget) -> Result<(), DeliveryError> {
        let url = self.link_for(artifact)?;
        let reply = Reply::attachment(Attachment::Remote {
            url,
            name: file_name(artifact),
        });

        match tokio::time::timeout(self.timeout, self.messenger.send(target, reply)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::unavailable(ChannelKind::RoutedLink, e)),
            Err(_) => Err(DeliveryError::unavailable(ChannelKind::RoutedLink, "timed out")),
        }
    }
}

/// Posts the file to a OneBot-style HTTP upload API.
pub struct UploadApiChannel {
    client: reqwest::Client,
    base_url: String,
}

impl UploadApiChannel {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("http://{}:{}", host, port),
        })
    }

    fn request_for(&self, artifact: &Path, target: &DeliveryTarget) -> (String, Value) {
        let file = fs::canonicalize(artifact)
            .unwrap_or_else(|_| artifact.to_path_buf())
            .to_string_lossy()
            .to_string();
        // OneBot ids are numeric; keep non-numeric session ids as strings
        let session: Value = target
            .session_id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(target.session_id.clone()));

        match target.kind {
            ConversationKind::Private => (
                format!("{}/upload_private_file", self.base_url),
                json!({ "user_id": session, "file": file, "name": file_name(artifact) }),
            ),
            ConversationKind::Group => (
                format!("{}/upload_group_file", self.base_url),
                json!({ "group_id": session, "file": file, "name": file_name(artifact) }),
            ),
        }
    }
}

#[async_trait]
impl Channel for UploadApiChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::UploadApi
    }

    async fn attempt(&self, artifact: &Path, target: &DeliveryTarget) -> Result<(), DeliveryError> {
        let (endpoint, body) = self.request_for(artifact, target);
        let unavailable = |reason: String| DeliveryError::unavailable(ChannelKind::UploadApi, reason);

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("{} returned {}", endpoint, status)));
        }

        // The API may answer 200 with a failure status in the body
        if let Ok(reply) = response.json::<Value>().await {
            let failed_status = reply.get("status").and_then(Value::as_str) == Some("failed");
            let retcode = reply.get("retcode").and_then(Value::as_i64).unwrap_or(0);
            if failed_status || retcode != 0 {
                return Err(unavailable(format!("upload rejected (retcode {})", retcode)));
            }
        }
        Ok(())
    }
}

/// Hands the local path to the messaging layer's own attachment support.
pub struct NativeChannel {
    messenger: Arc<dyn Messenger>,
}

impl NativeChannel {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }
}

#[async_trait]
impl Channel for NativeChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Native
    }

    async fn attempt(&self, artifact: &Path, target: &DeliveryTarget) -> Result<(), DeliveryError> {
        let reply = Reply::attachment(Attachment::Local {
            path: artifact.to_path_buf(),
            kind: AttachmentKind::for_path(artifact),
        });
        self.messenger
            .send(target, reply)
            .await
            .map_err(|e| DeliveryError::unavailable(ChannelKind::Native, e))
    }
}

pub struct DeliveryRouter {
    channels: Vec<Arc<dyn Channel>>,
}

impl DeliveryRouter {
    /// `channels` must already be in priority order.
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        Self { channels }
    }

    pub fn from_config(
        config: &DeliveryConfig,
        served_root: &Path,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self, DeliveryError> {
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();

        if config.enable_routed_link_channel {
            channels.push(Arc::new(RoutedLinkChannel::new(
                served_root.to_path_buf(),
                config.routed_link_host.clone(),
                config.served_port,
                Arc::clone(&messenger),
                config.link_timeout(),
            )));
        }
        if config.enable_upload_api_channel {
            channels.push(Arc::new(UploadApiChannel::new(
                &config.upload_api_host,
                config.upload_api_port,
                config.upload_timeout(),
            )?));
        }
        channels.push(Arc::new(NativeChannel::new(messenger)));

        Ok(Self::new(channels))
    }

    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        self.channels.iter().map(|c| c.kind()).collect()
    }

    pub async fn deliver(&self, artifacts: &[PathBuf], target: &DeliveryTarget) -> Vec<ArtifactDelivery> {
        let mut deliveries = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            deliveries.push(self.deliver_one(artifact, target).await);
        }
        deliveries
    }

    async fn deliver_one(&self, artifact: &Path, target: &DeliveryTarget) -> ArtifactDelivery {
        let mut delivery = ArtifactDelivery {
            path: artifact.to_path_buf(),
            attempts: Vec::new(),
            delivered_via: None,
            error: None,
        };

        if !artifact.is_file() {
            warn!(path = %artifact.display(), "artifact missing, nothing to deliver");
            delivery.error = Some(DeliveryError::MissingArtifact);
            return delivery;
        }

        for channel in &self.channels {
            match channel.attempt(artifact, target).await {
                Ok(()) => {
                    info!(path = %artifact.display(), channel = %channel.kind(), "artifact delivered");
                    delivery.attempts.push(DeliveryOutcome {
                        channel: channel.kind(),
                        success: true,
                        error: None,
                    });
                    delivery.delivered_via = Some(channel.kind());
                    return delivery;
                }
                Err(e) => {
                    warn!(path = %artifact.display(), channel = %channel.kind(), error = %e, "delivery attempt failed");
                    delivery.attempts.push(DeliveryOutcome {
                        channel: channel.kind(),
                        success: false,
                        error: Some(e),
                    });
                }
            }
        }

        delivery.error = Some(DeliveryError::AllChannelsExhausted);
        delivery
    }
}
