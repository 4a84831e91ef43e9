// Per-track delivery run: cache first, then retrieval and persist, then send.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::antiblock::{jittered_delay, pick_user_agent, uniform_secs, uniform_whole_secs};
use super::cache::{is_valid_id, CacheEntryState, CachedTrack, StoreOutcome, TrackCache, TrackMetadata};
use super::inflight::InflightLocks;
use super::stats::{StatsCollector, StatsSnapshot};
use crate::config::{watch_url, BotConfig, DownloadSettings, AUDIO_FORMAT_SELECTOR, SEND_TIMEOUT};
use crate::error::{FailureReason, FetchFailure, InfoFailure, RetrievalError};
use crate::source::traits::{
    AudioUpload, ChatId, DeliveryGateway, DownloadOptions, MediaRetriever, MessageRef,
    RetrievalOptions, TrackInfo,
};

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Step of a delivery run, used for logging and failure accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    CacheLookup,
    InfoExtraction,
    MediaFetch,
    Persist,
    Send,
}

/// One user's request to receive a track.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub id: String,
    pub chat: ChatId,
    pub proxy: Option<String>,
    pub cookie_file: Option<PathBuf>,
}

impl DownloadRequest {
    pub fn new(id: impl Into<String>, chat: ChatId) -> Self {
        Self {
            id: id.into(),
            chat,
            proxy: None,
            cookie_file: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookie_file(mut self, cookie_file: Option<PathBuf>) -> Self {
        self.cookie_file = cookie_file;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { from_cache: bool },
    Failed(FailureReason),
}

/// Receives human-readable progress for one request.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update(&self, text: &str);
    /// Called once the track has been delivered.
    async fn finish(&self);
}

/// Status sink backed by a single chat message that is edited in place.
pub struct MessageStatus {
    gateway: Arc<dyn DeliveryGateway>,
    chat: ChatId,
    message: Mutex<Option<MessageRef>>,
}

impl MessageStatus {
    /// Edit `message` if given, otherwise send a new one on first update.
    pub fn new(gateway: Arc<dyn DeliveryGateway>, chat: ChatId, message: Option<MessageRef>) -> Self {
        Self {
            gateway,
            chat,
            message: Mutex::new(message),
        }
    }
}

#[async_trait]
impl StatusSink for MessageStatus {
    async fn update(&self, text: &str) {
        let current = *self.message.lock();
        if let Some(message) = current {
            match self.gateway.edit_text(message, text).await {
                Ok(()) => return,
                Err(e) => warn!("status edit failed, sending new message: {}", e),
            }
        }
        match self.gateway.send_text(self.chat, text).await {
            Ok(sent) => *self.message.lock() = Some(sent),
            Err(e) => warn!("status send failed: {}", e),
        }
    }

    async fn finish(&self) {
        let current = self.message.lock().take();
        if let Some(message) = current {
            if let Err(e) = self.gateway.delete_message(message).await {
                debug!("status delete failed: {}", e);
            }
        }
    }
}

pub struct DownloadOrchestrator {
    cache: TrackCache,
    retriever: Arc<dyn MediaRetriever>,
    gateway: Arc<dyn DeliveryGateway>,
    settings: DownloadSettings,
    user_agents: Vec<String>,
    inflight: InflightLocks,
    stats: StatsCollector,
}

impl DownloadOrchestrator {
    pub fn new(
        cache: TrackCache,
        retriever: Arc<dyn MediaRetriever>,
        gateway: Arc<dyn DeliveryGateway>,
        settings: DownloadSettings,
        user_agents: Vec<String>,
    ) -> Self {
        Self {
            cache,
            retriever,
            gateway,
            settings,
            user_agents,
            inflight: InflightLocks::new(),
            stats: StatsCollector::new(),
        }
    }

    pub fn from_config(
        config: &BotConfig,
        retriever: Arc<dyn MediaRetriever>,
        gateway: Arc<dyn DeliveryGateway>,
    ) -> Self {
        Self::new(
            TrackCache::new(config.cache.dir.clone()),
            retriever,
            gateway,
            config.download.clone(),
            config.network.user_agents.clone(),
        )
    }

    pub fn cache(&self) -> &TrackCache {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run [`deliver`](Self::deliver) as an independent task.
    pub fn spawn_delivery(
        self: &Arc<Self>,
        request: DownloadRequest,
        status: Arc<dyn StatusSink>,
    ) -> JoinHandle<DeliveryOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.deliver(&request, status.as_ref()).await })
    }

    /// Resolve `request.id` to audio and send it to `request.chat`.
    ///
    /// Never returns an error: every failure is logged, reported to `status`,
    /// and folded into [`DeliveryOutcome::Failed`].
    pub async fn deliver(&self, request: &DownloadRequest, status: &dyn StatusSink) -> DeliveryOutcome {
        let id = request.id.as_str();
        info!(
            "[{}] starting delivery for chat {} proxy={:?}",
            id, request.chat.0, request.proxy
        );

        if !is_valid_id(id) {
            return self
                .fail(id, status, Phase::Init, FailureReason::InfoExtraction(InfoFailure::Generic))
                .await;
        }

        // A concurrent run for the same id finishes first; we then see its cache entry.
        let _inflight = self.inflight.acquire(id).await;

        debug!("[{}] phase {:?}", id, Phase::CacheLookup);
        let state = self
            .with_cache(id, |cache, id| cache.state(&id))
            .await
            .unwrap_or_else(|e| {
                warn!("[{}] cache lookup task failed: {}", id, e);
                CacheEntryState::Absent
            });
        match state {
            CacheEntryState::Complete(track) => {
                info!("[{}] cache hit for audio and metadata", id);
                self.stats.record_cache_hit();
                status.update("Track found in cache! Sending now...").await;
                match self.send(request.chat, &track).await {
                    Ok(()) => {
                        info!("[{}] sent cached file", id);
                        self.stats.record_delivered();
                        status.finish().await;
                        return DeliveryOutcome::Delivered { from_cache: true };
                    }
                    Err(e) => {
                        error!(
                            "[{}] error sending cached file {}: {:#}",
                            id,
                            track.audio_path.display(),
                            e
                        );
                        status
                            .update("Error sending cached file. Will attempt redownload.")
                            .await;
                    }
                }
            }
            CacheEntryState::AudioOnly => {
                info!("[{}] cached audio has no metadata, redownloading", id);
            }
            CacheEntryState::Absent => {}
        }

        self.stats.record_cache_miss();
        info!("[{}] cache miss, proceeding with download", id);
        status
            .update("Downloading and processing track... (this may take a moment)")
            .await;

        if let Err(e) = tokio::fs::create_dir_all(self.cache.dir()).await {
            return self
                .fail(id, status, Phase::Persist, FailureReason::Persist(e.to_string()))
                .await;
        }

        let opts = RetrievalOptions {
            proxy: request.proxy.clone(),
            user_agent: pick_user_agent(&self.user_agents),
            cookie_file: request.cookie_file.clone(),
        };
        info!("[{}] using User-Agent: {}", id, opts.user_agent);
        if let Some(cookies) = &opts.cookie_file {
            info!("[{}] using cookie file {}", id, cookies.display());
        }

        let info = match self.extract_info(id, &opts).await {
            Ok(info) => info,
            Err(e) => {
                error!("[{}] failed to extract info: {}", id, e);
                // Stale partials from an earlier interrupted run.
                self.cleanup_partials(id).await;
                return self
                    .fail(id, status, Phase::InfoExtraction, FailureReason::InfoExtraction((&e).into()))
                    .await;
            }
        };

        let target = info
            .webpage_url
            .clone()
            .unwrap_or_else(|| watch_url(id));
        if let Err(kind) = self.fetch_media(id, &target, opts).await {
            let removed = self.cleanup_partials(id).await;
            debug!("[{}] removed {} partial files", id, removed);
            return self
                .fail(id, status, Phase::MediaFetch, FailureReason::MediaFetch(kind))
                .await;
        }

        debug!("[{}] phase {:?}", id, Phase::Persist);
        let temp = self.cache.temp_audio_path(id);
        if let Ok(m) = tokio::fs::metadata(&temp).await {
            self.stats.record_downloaded(m.len());
        }
        let metadata = metadata_from_info(id, &info);
        let stored = {
            let metadata = metadata.clone();
            self.with_cache(id, move |cache, id| cache.store_file(&id, &temp, &metadata))
                .await
                .and_then(|r| r)
        };
        let track = match stored {
            Ok(StoreOutcome::Complete(track)) => track,
            Ok(StoreOutcome::AudioOnly { audio_path, .. }) => {
                self.stats.record_degraded_entry();
                CachedTrack {
                    audio_path,
                    metadata,
                }
            }
            Err(e) => {
                self.cleanup_partials(id).await;
                return self
                    .fail(id, status, Phase::Persist, FailureReason::Persist(e.to_string()))
                    .await;
            }
        };
        self.cleanup_partials(id).await;

        debug!("[{}] phase {:?}", id, Phase::Send);
        status.update("Upload starting...").await;
        match self.send(request.chat, &track).await {
            Ok(()) => {
                info!("[{}] sent audio file", id);
                self.stats.record_delivered();
                status.finish().await;
                DeliveryOutcome::Delivered { from_cache: false }
            }
            Err(e) => {
                // The cache entry stays valid for the next request.
                self.fail(id, status, Phase::Send, FailureReason::Delivery(format!("{:#}", e)))
                    .await
            }
        }
    }

    /// Run a filesystem operation on the cache off the async worker threads.
    async fn with_cache<T, F>(&self, id: &str, op: F) -> Result<T>
    where
        F: FnOnce(TrackCache, String) -> T + Send + 'static,
        T: Send + 'static,
    {
        let cache = self.cache.clone();
        let id = id.to_string();
        Ok(tokio::task::spawn_blocking(move || op(cache, id)).await?)
    }

    async fn cleanup_partials(&self, id: &str) -> usize {
        match self.with_cache(id, |cache, id| cache.cleanup_partials(&id)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("[{}] partial cleanup task failed: {}", id, e);
                0
            }
        }
    }

    async fn extract_info(&self, id: &str, opts: &RetrievalOptions) -> Result<TrackInfo, RetrievalError> {
        debug!("[{}] phase {:?}", id, Phase::InfoExtraction);
        let url = watch_url(id);
        jittered_delay(self.settings.info_delay_secs).await;
        info!("[{}] extracting track info from {}", id, url);
        let info = self.retriever.extract_info(&url, opts).await?;
        info!("[{}] extracted track info", id);
        Ok(info)
    }

    async fn fetch_media(
        &self,
        id: &str,
        target: &str,
        base: RetrievalOptions,
    ) -> std::result::Result<(), FetchFailure> {
        debug!("[{}] phase {:?}", id, Phase::MediaFetch);
        let used_cookies = base.cookie_file.is_some();
        let used_proxy = base.proxy.is_some();
        let opts = DownloadOptions {
            base,
            format: AUDIO_FORMAT_SELECTOR.to_string(),
            output_template: self.cache.temp_template(id),
            retries: self.settings.retries,
            fragment_retries: self.settings.fragment_retries,
            retry_sleep_secs: uniform_whole_secs(self.settings.retry_sleep_secs),
            request_sleep_secs: uniform_secs(self.settings.request_sleep_secs),
            throttled_rate: self.settings.throttled_rate.clone(),
            audio_bitrate_kbps: self.settings.audio_bitrate_kbps,
        };

        let delay = jittered_delay(self.settings.fetch_delay_secs).await;
        info!(
            "[{}] downloading {} after {:.2}s delay",
            id,
            target,
            delay.as_secs_f64()
        );

        match self.retriever.download(target, &opts).await {
            Ok(()) => {}
            Err(e) => {
                error!("[{}] download failed: {}", id, e);
                return Err(match e {
                    RetrievalError::Blocked(_) => FetchFailure::Blocked {
                        used_cookies,
                        used_proxy,
                    },
                    RetrievalError::Unavailable(_) => FetchFailure::Unavailable,
                    _ => FetchFailure::Generic,
                });
            }
        }

        match tokio::fs::metadata(self.cache.temp_audio_path(id)).await {
            Ok(m) if m.is_file() => {}
            _ => {
                error!("[{}] processed file not found after download", id);
                return Err(FetchFailure::MissingOutput);
            }
        }
        info!("[{}] download and processing completed", id);
        Ok(())
    }

    async fn send(&self, chat: ChatId, track: &CachedTrack) -> Result<()> {
        let data = tokio::fs::read(&track.audio_path).await?;
        let meta = &track.metadata;
        let display = format!("{} - {}", meta.title, meta.artist);
        let upload = AudioUpload {
            data: Bytes::from(data),
            file_name: format!("{}.mp3", display.replace(['/', '\\'], "_")),
            caption: display,
            title: meta.title.clone(),
            performer: meta.artist.clone(),
            duration_seconds: meta.duration_seconds,
        };
        self.gateway.send_audio(chat, upload, SEND_TIMEOUT).await
    }

    async fn fail(
        &self,
        id: &str,
        status: &dyn StatusSink,
        phase: Phase,
        reason: FailureReason,
    ) -> DeliveryOutcome {
        error!("[{}] {:?} failed: {}", id, phase, reason);
        self.stats.record_failure(phase);
        status.update(&reason.user_message()).await;
        DeliveryOutcome::Failed(reason)
    }
}

/// Artist preference: explicit artist, uploader, channel, then a placeholder.
pub fn resolve_artist(info: &TrackInfo) -> String {
    [&info.artist, &info.uploader, &info.channel]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string())
}

fn metadata_from_info(id: &str, info: &TrackInfo) -> TrackMetadata {
    TrackMetadata {
        title: info
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        artist: resolve_artist(info),
        duration_seconds: info
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d as u64)
            .unwrap_or(0),
        id: id.to_string(),
    }
}
