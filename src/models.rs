use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    pub id: i64,
    /// Canonical gallery URL; for single-chapter requests this is the chapter URL.
    pub url: String,
    pub title: Option<String>,
    pub cover_url: Option<String>,
    pub page_count: u32,
}

impl Gallery {
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: None,
            cover_url: None,
            page_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub gallery_id: i64,
    pub url: String,
    pub order: u32,
    pub title: Option<String>,
}

impl Chapter {
    pub fn new(gallery_id: i64, url: impl Into<String>, order: u32) -> Self {
        Self {
            gallery_id,
            url: url.into(),
            order,
            title: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Saved,
    Ignored,
    Error,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Saved => "saved",
            ImageStatus::Ignored => "ignored",
            ImageStatus::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ImageStatus::Pending),
            "saved" => Some(ImageStatus::Saved),
            "ignored" => Some(ImageStatus::Ignored),
            "error" => Some(ImageStatus::Error),
            _ => None,
        }
    }
}

/// Headers a downloader must replay to fetch the image bytes later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadParams {
    pub headers: BTreeMap<String, String>,
}

impl DownloadParams {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub url: String,
    pub order: u32,
    pub status: ImageStatus,
    pub is_cover: bool,
    /// `None` for records attached to the gallery itself (covers, chapter-less sources).
    pub chapter_url: Option<String>,
    pub backup_url: Option<String>,
    pub download_params: Option<DownloadParams>,
}

impl ImageRecord {
    pub fn page(url: impl Into<String>, order: u32, chapter_url: Option<&str>) -> Self {
        Self {
            url: url.into(),
            order,
            status: ImageStatus::Saved,
            is_cover: false,
            chapter_url: chapter_url.map(str::to_string),
            backup_url: None,
            download_params: None,
        }
    }

    pub fn cover(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            order: 0,
            status: ImageStatus::Saved,
            is_cover: true,
            chapter_url: None,
            backup_url: None,
            download_params: None,
        }
    }
}
