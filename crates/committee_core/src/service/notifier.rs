//! Change notification port.
//!
//! # Responsibility
//! - Define the `publish(subject, payload)` capability used after committed
//!   writes, and the JSON message shape sent through it.
//! - Provide a logging implementation and an in-memory recorder.
//!
//! # Invariants
//! - Publishing happens only after the write it describes has committed.
//! - Publish failures are logged and swallowed; they never undo or fail the
//!   write.

use crate::context::{ContextError, OpContext};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

pub const COMMITTEE_INDEX_SUBJECT: &str = "committee.index";
pub const COMMITTEE_ACCESS_SUBJECT: &str = "committee.access";
pub const MEMBER_INDEX_SUBJECT: &str = "committee_member.index";
pub const MEMBER_ACCESS_SUBJECT: &str = "committee_member.access";

#[derive(Debug)]
pub enum PublishError {
    Unavailable(String),
    Context(ContextError),
}

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "publisher unavailable: {message}"),
            Self::Context(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Context(err) => Some(err),
            Self::Unavailable(_) => None,
        }
    }
}

/// Event side channel towards search indexing and access-control sync.
pub trait ChangeNotifier: Send + Sync {
    fn publish(&self, ctx: &OpContext, subject: &str, payload: &[u8]) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// Wire message published on every subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub action: ChangeAction,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committee_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ChangeMessage {
    pub fn new(action: ChangeAction, uid: impl Into<String>) -> Self {
        Self {
            action,
            uid: uid.into(),
            committee_uid: None,
            data: None,
        }
    }

    pub fn with_committee(mut self, committee_uid: impl Into<String>) -> Self {
        self.committee_uid = Some(committee_uid.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Serializes `message` and publishes it on `subject`, logging failures.
///
/// Returns whether the notifier accepted the message.
pub(crate) fn publish_best_effort(
    notifier: &dyn ChangeNotifier,
    ctx: &OpContext,
    subject: &str,
    message: &ChangeMessage,
) -> bool {
    let payload = match serde_json::to_vec(message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(
                "event=change_publish module=notifier status=error subject={subject} uid={} error=encode:{err}",
                message.uid
            );
            return false;
        }
    };
    match notifier.publish(ctx, subject, &payload) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                "event=change_publish module=notifier status=error subject={subject} uid={} action={} error={err}",
                message.uid,
                message.action.as_str()
            );
            false
        }
    }
}

/// Notifier that only writes a debug log line per message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ChangeNotifier for LogNotifier {
    fn publish(&self, ctx: &OpContext, subject: &str, payload: &[u8]) -> Result<(), PublishError> {
        ctx.check().map_err(PublishError::Context)?;
        debug!(
            "event=change_publish module=notifier status=ok subject={subject} bytes={}",
            payload.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn decode(&self) -> Result<ChangeMessage, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Records published messages in memory. Can be switched to fail every
/// publish.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    published: Mutex<Vec<PublishedMessage>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Decoded messages published on `subject`, oldest first.
    pub fn messages_for(&self, subject: &str) -> Vec<ChangeMessage> {
        self.published
            .lock()
            .iter()
            .filter(|message| message.subject == subject)
            .filter_map(|message| message.decode().ok())
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

impl ChangeNotifier for MemoryNotifier {
    fn publish(&self, ctx: &OpContext, subject: &str, payload: &[u8]) -> Result<(), PublishError> {
        ctx.check().map_err(PublishError::Context)?;
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("memory notifier set to fail".to_string()));
        }
        self.published.lock().push(PublishedMessage {
            subject: subject.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
