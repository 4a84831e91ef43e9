use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RetrievalError;

/// Result category requested from the catalog backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    Songs,
    Videos,
}

/// One raw item from the catalog backend, before normalization.
#[derive(Debug, Clone, Default)]
pub struct CatalogItem {
    pub video_id: Option<String>,
    pub title: Option<String>,
    /// Credited artist names, in display order.
    pub artists: Vec<String>,
    /// Uploader or channel name when no artists are credited.
    pub uploader: Option<String>,
    pub duration_seconds: Option<u64>,
    /// Display duration such as `"3:45"`.
    pub duration_text: Option<String>,
    /// Thumbnail URLs, smallest first.
    pub thumbnails: Vec<String>,
}

/// One raw entry from the generic video search backend.
#[derive(Debug, Clone, Default)]
pub struct VideoEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<u64>,
    pub channel: Option<String>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
}

/// Structured catalog search (primary backend).
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    async fn search(&self, query: &str, filter: SearchFilter, limit: usize)
        -> Result<Vec<CatalogItem>>;
}

/// Generic URL-based search (secondary backend).
///
/// `query` carries the backend prefix and result count, e.g. `ytsearch5:Believer`.
#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, query: &str, proxy: Option<&str>) -> Result<Vec<VideoEntry>>;
}

/// Network identity shared by both retrieval modes.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    pub proxy: Option<String>,
    pub user_agent: String,
    pub cookie_file: Option<PathBuf>,
}

/// Parameters of a full download + transcode run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub base: RetrievalOptions,
    pub format: String,
    /// Output template, e.g. `cache/abc123_temp.%(ext)s`.
    pub output_template: String,
    pub retries: u32,
    pub fragment_retries: u32,
    pub retry_sleep_secs: u64,
    pub request_sleep_secs: f64,
    pub throttled_rate: String,
    pub audio_bitrate_kbps: u32,
}

/// Metadata resolved in metadata-only mode.
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<f64>,
    pub webpage_url: Option<String>,
}

/// External media retrieval engine.
#[async_trait]
pub trait MediaRetriever: Send + Sync {
    /// Resolve `url` to metadata without downloading media.
    async fn extract_info(
        &self,
        url: &str,
        opts: &RetrievalOptions,
    ) -> std::result::Result<TrackInfo, RetrievalError>;

    /// Download and transcode `url` according to `opts.output_template`.
    async fn download(
        &self,
        url: &str,
        opts: &DownloadOptions,
    ) -> std::result::Result<(), RetrievalError>;
}

/// Chat destination handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// A previously sent message that can be edited or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message_id: i64,
}

/// Audio payload plus display metadata.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub data: Bytes,
    pub file_name: String,
    pub caption: String,
    pub title: String,
    pub performer: String,
    pub duration_seconds: u64,
}

/// Chat platform operations used to report progress and deliver audio.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef>;
    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()>;
    async fn delete_message(&self, message: MessageRef) -> Result<()>;
    async fn send_audio(&self, chat: ChatId, audio: AudioUpload, timeout: Duration) -> Result<()>;
}
