use serde::{Deserialize, Serialize};

use crate::domain::{Note, NoteColor, NoteId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResponse {
    pub session_id: String,
}

/// A note as the backend returns it during synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNote {
    pub id: NoteId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub color: NoteColor,
}

impl From<RemoteNote> for Note {
    fn from(value: RemoteNote) -> Self {
        Self {
            id: Some(value.id),
            title: value.title,
            content: value.content,
            timestamp: value.timestamp,
            color: value.color,
        }
    }
}
