use crate::error::{MarginError, PermissionError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub title: String,
    pub message: Option<String>,
}

/// Dismissible notifications, oldest first.
#[derive(Debug, Default)]
pub struct Notifier {
    next_id: u64,
    notices: Vec<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: NoticeLevel, title: &str, message: Option<&str>) -> u64 {
        self.next_id += 1;
        self.notices.push(Notice {
            id: self.next_id,
            level,
            title: title.to_string(),
            message: message.map(str::to_string),
        });
        self.next_id
    }

    pub fn success(&mut self, title: &str) -> u64 {
        info!("{}", title);
        self.push(NoticeLevel::Success, title, None)
    }

    pub fn error(&mut self, title: &str, err: &MarginError) -> u64 {
        warn!("{}: {}", title, err);
        let message = user_message(err);
        self.push(NoticeLevel::Error, title, Some(&message))
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    pub fn active(&self) -> &[Notice] {
        &self.notices
    }

    pub fn clear(&mut self) {
        self.notices.clear();
    }
}

/// Reader-facing wording for an error.
pub fn user_message(err: &MarginError) -> String {
    match err {
        MarginError::Permission(PermissionError::AuthenticationRequired) => {
            "Please sign in to post a response.".to_string()
        }
        MarginError::Permission(PermissionError::NotAuthor) => {
            "You can only delete your own annotations.".to_string()
        }
        MarginError::Permission(PermissionError::PrivateNote) => {
            "This note is private.".to_string()
        }
        MarginError::Transport(_) => "Network error. Please try again.".to_string(),
        MarginError::NotFound(_) => "That annotation no longer exists.".to_string(),
        MarginError::InvalidArgument(message) => message.clone(),
        _ => "Something went wrong.".to_string(),
    }
}
