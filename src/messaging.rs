//! Seams to the hosting chat framework: who may run snippets, and how replies go out.

use crate::storage::{ConversationKind, DeliveryTarget};
use async_trait::async_trait;
use colored::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    pub fn for_path(path: &Path) -> Self {
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image {
            AttachmentKind::Image
        } else {
            AttachmentKind::File
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Local { path: PathBuf, kind: AttachmentKind },
    Remote { url: String, name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachments: Vec::new(),
        }
    }

    pub fn attachment(attachment: Attachment) -> Self {
        Self {
            text: None,
            attachments: vec![attachment],
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("message could not be sent: {0}")]
pub struct MessagingError(pub String);

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, target: &DeliveryTarget, reply: Reply) -> Result<(), MessagingError>;
}

pub trait Permissions: Send + Sync {
    fn is_authorized(&self, requester_id: &str) -> bool;
}

/// Allow-list from configuration; an empty list lets everyone through.
pub struct ConfigPermissions {
    allowed: HashSet<String>,
}

impl ConfigPermissions {
    pub fn new(authorized_requesters: &[String]) -> Self {
        Self {
            allowed: authorized_requesters.iter().cloned().collect(),
        }
    }
}

impl Permissions for ConfigPermissions {
    fn is_authorized(&self, requester_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(requester_id)
    }
}

/// Prints replies to the terminal.
pub struct ConsoleMessenger;

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(&self, target: &DeliveryTarget, reply: Reply) -> Result<(), MessagingError> {
        let kind = match target.kind {
            ConversationKind::Private => "private",
            ConversationKind::Group => "group",
        };
        let header = format!("[{} {}]", kind, target.session_id).dimmed();

        if let Some(text) = reply.text {
            println!("{} {}", header, text);
        }
        for attachment in reply.attachments {
            match attachment {
                Attachment::Local { path, kind: AttachmentKind::Image } => {
                    println!("{} {} {}", header, "image:".cyan().bold(), path.display())
                }
                Attachment::Local { path, kind: AttachmentKind::File } => {
                    println!("{} {} {}", header, "file:".cyan().bold(), path.display())
                }
                Attachment::Remote { url, name } => {
                    println!("{} {} {} ({})", header, "link:".cyan().bold(), url, name)
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_kind_by_extension() {
        assert_eq!(AttachmentKind::for_path(Path::new("/o/plot.PNG")), AttachmentKind::Image);
        assert_eq!(AttachmentKind::for_path(Path::new("chart.jpeg")), AttachmentKind::Image);
        assert_eq!(AttachmentKind::for_path(Path::new("table.xlsx")), AttachmentKind::File);
        assert_eq!(AttachmentKind::for_path(Path::new("README")), AttachmentKind::File);
    }

    #[test]
    fn test_empty_allow_list_authorizes_everyone() {
        let open = ConfigPermissions::new(&[]);
        assert!(open.is_authorized("anyone"));

        let closed = ConfigPermissions::new(&["admin".to_string()]);
        assert!(closed.is_authorized("admin"));
        assert!(!closed.is_authorized("guest"));
    }
}
