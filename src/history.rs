use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{GeneratedImage, ViewLabel};
use crate::pipeline::RunToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrigin {
    InitialStyle,
    FinalLook,
    Angle(ViewLabel),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub run: RunToken,
    pub origin: HistoryOrigin,
    pub image: GeneratedImage,
    pub recorded_at: DateTime<Utc>,
}

/// Every image produced during one studio session, in the order it arrived.
/// Entries are only ever appended; the whole list goes away on reset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionHistory {
    entries: Vec<HistoryEntry>,
}

impl SessionHistory {
    pub fn append(&mut self, run: RunToken, origin: HistoryOrigin, images: impl IntoIterator<Item = GeneratedImage>) {
        let now = Utc::now();
        self.entries.extend(images.into_iter().map(|image| HistoryEntry { run, origin, image, recorded_at: now }));
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
