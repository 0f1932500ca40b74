use std::{fmt, str::FromStr};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(NoteId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteColor {
    #[default]
    Yellow,
    Red,
    Orange,
    Green,
    Blue,
    Purple,
}

impl NoteColor {
    pub const ALL: [NoteColor; 6] = [
        NoteColor::Yellow,
        NoteColor::Red,
        NoteColor::Orange,
        NoteColor::Green,
        NoteColor::Blue,
        NoteColor::Purple,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NoteColor::Yellow => "yellow",
            NoteColor::Red => "red",
            NoteColor::Orange => "orange",
            NoteColor::Green => "green",
            NoteColor::Blue => "blue",
            NoteColor::Purple => "purple",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown note color '{0}'")]
pub struct UnknownNoteColor(pub String);

impl FromStr for NoteColor {
    type Err = UnknownNoteColor;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        NoteColor::ALL
            .into_iter()
            .find(|color| color.as_str() == raw)
            .ok_or_else(|| UnknownNoteColor(raw.to_string()))
    }
}

/// A single note as held by the local cache.
///
/// `id` is `None` until the cache assigns one on insert; once assigned it never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NoteId>,
    pub title: String,
    pub content: String,
    /// Epoch milliseconds of the last create/update.
    pub timestamp: i64,
    #[serde(default)]
    pub color: NoteColor,
}

impl Note {
    /// Builds an unsaved note stamped with the current wall-clock time.
    pub fn new(title: impl Into<String>, content: impl Into<String>, color: NoteColor) -> Self {
        Self {
            id: None,
            title: title.into(),
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
            color,
        }
    }

    pub fn with_id(mut self, id: NoteId) -> Self {
        self.id = Some(id);
        self
    }

    /// Stamps the note with the current wall-clock time.
    pub fn touch(&mut self) {
        self.timestamp = Utc::now().timestamp_millis();
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryParameters {
    pub search_text: String,
    pub sort_order: SortOrder,
}

impl QueryParameters {
    pub fn new(search_text: impl Into<String>, sort_order: SortOrder) -> Self {
        Self {
            search_text: search_text.into(),
            sort_order,
        }
    }

    /// Case-sensitive substring match on the title; an empty search matches everything.
    pub fn matches(&self, note: &Note) -> bool {
        self.search_text.is_empty() || note.title.contains(&self.search_text)
    }
}
