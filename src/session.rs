//! State of the single-user web session.
//!
//! Tracks which file is loaded, whether it has been indexed, and the chat
//! transcript. Uploading a different file (by name or content) starts a
//! fresh conversation.

use serde::Serialize;
use tokio::sync::RwLock;

use crate::models::ChatMessage;
use crate::pipeline::IndexReport;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub file_name: Option<String>,
    pub file_hash: Option<String>,
    pub processing_complete: bool,
    pub messages: Vec<ChatMessage>,
    pub last_report: Option<IndexReport>,
}

#[derive(Default)]
pub struct Session {
    state: RwLock<SessionSnapshot>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session over an already-populated collection whose source file is
    /// unknown.
    pub fn resumed() -> Self {
        Self {
            state: RwLock::new(SessionSnapshot {
                processing_complete: true,
                ..SessionSnapshot::default()
            }),
        }
    }

    /// Record an upload. Returns `true` when it differs from the current
    /// file, in which case the transcript and processed flag are reset.
    pub async fn observe_upload(&self, name: &str, hash: &str) -> bool {
        let mut state = self.state.write().await;
        let same = state.file_name.as_deref() == Some(name)
            && state.file_hash.as_deref() == Some(hash);
        if same {
            return false;
        }
        state.file_name = Some(name.to_string());
        state.file_hash = Some(hash.to_string());
        state.processing_complete = false;
        state.messages.clear();
        state.last_report = None;
        true
    }

    pub async fn mark_processed(&self, report: IndexReport) {
        let mut state = self.state.write().await;
        state.processing_complete = true;
        state.last_report = Some(report);
    }

    pub async fn is_processed(&self) -> bool {
        self.state.read().await.processing_complete
    }

    pub async fn push_message(&self, message: ChatMessage) {
        self.state.write().await.messages.push(message);
    }

    pub async fn clear(&self) {
        *self.state.write().await = SessionSnapshot::default();
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_file_resets_conversation() {
        let session = Session::new();
        assert!(session.observe_upload("a.csv", "h1").await);
        session.mark_processed(IndexReport::default()).await;
        session.push_message(ChatMessage::user("total?")).await;

        assert!(!session.observe_upload("a.csv", "h1").await);
        assert!(session.is_processed().await);
        assert_eq!(session.snapshot().await.messages.len(), 1);

        assert!(session.observe_upload("a.csv", "h2").await);
        let snap = session.snapshot().await;
        assert!(!snap.processing_complete);
        assert!(snap.messages.is_empty());
        assert!(snap.last_report.is_none());
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let session = Session::resumed();
        assert!(session.is_processed().await);
        session.push_message(ChatMessage::assistant("hi")).await;
        session.clear().await;
        let snap = session.snapshot().await;
        assert!(!snap.processing_complete);
        assert!(snap.messages.is_empty());
        assert!(snap.file_name.is_none());
    }
}
