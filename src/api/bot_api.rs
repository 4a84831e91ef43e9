// Chat command surface: reply texts, result buttons and callback handling.
//
// Update polling and dispatch live in the host; these helpers turn its inputs
// into searches and delivery runs.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::init::init_tracing;
use crate::config::BotConfig;
use crate::engine::orchestrator::{DeliveryOutcome, DownloadOrchestrator, DownloadRequest, MessageStatus};
use crate::engine::search::{SearchAggregator, TrackCandidate};
use crate::source::traits::{
    CatalogSearch, ChatId, DeliveryGateway, MediaRetriever, MessageRef, VideoSearch,
};
use crate::source::telegram::TelegramGateway;
use crate::source::ytdlp::YtDlp;
use crate::source::ytmusic::YtMusicClient;

const DOWNLOAD_PREFIX: &str = "dl_";

pub const HELP_TEXT: &str = "How to use the bot:\n\
- Send any text message to search for tracks on YouTube Music.\n\
- I'll show you the top results.\n\
- Click the button next to a track to start the download.\n\n\
Features:\n\
- Searches YouTube Music (including lyrics) with a yt-dlp fallback.\n\
- Provides MP3 audio converted from the best available audio source.\n\
- Supports proxy usage for improved anti-blocking.";

pub fn start_text(user_name: &str) -> String {
    format!(
        "Hi {}!\nEnter the artist or track name, or even some lyrics, and I'll search YouTube Music for you!",
        user_name
    )
}

pub fn searching_text(query: &str) -> String {
    format!("Searching for '{}' on YouTube Music...", query)
}

/// `MM:SS`, minutes not capped at 59.
pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultButton {
    pub label: String,
    pub callback_data: String,
}

impl ResultButton {
    pub fn for_candidate(track: &TrackCandidate) -> Self {
        Self {
            label: format!(
                "🎧 {} - {} ({})",
                track.title,
                track.artist,
                format_duration(track.duration_seconds)
            ),
            callback_data: format!("{}{}", DOWNLOAD_PREFIX, track.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReply {
    pub text: String,
    pub buttons: Vec<ResultButton>,
}

impl SearchReply {
    pub fn from_candidates(candidates: &[TrackCandidate]) -> Self {
        if candidates.is_empty() {
            return Self {
                text: "Sorry, I couldn't find any tracks matching your query.".to_string(),
                buttons: Vec::new(),
            };
        }
        Self {
            text: "Here's what I found:".to_string(),
            buttons: candidates.iter().map(ResultButton::for_candidate).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotAction {
    Download(String),
    Unknown(String),
}

pub fn parse_callback(data: &str) -> BotAction {
    match data.strip_prefix(DOWNLOAD_PREFIX) {
        Some(id) if !id.is_empty() => BotAction::Download(id.to_string()),
        _ => BotAction::Unknown(data.to_string()),
    }
}

/// Search and delivery wired together for one bot instance.
pub struct MusicBot {
    config: BotConfig,
    search: SearchAggregator,
    orchestrator: Arc<DownloadOrchestrator>,
    gateway: Arc<dyn DeliveryGateway>,
}

impl MusicBot {
    pub fn new(
        config: BotConfig,
        catalog: Option<Arc<dyn CatalogSearch>>,
        fallback: Arc<dyn VideoSearch>,
        retriever: Arc<dyn MediaRetriever>,
        gateway: Arc<dyn DeliveryGateway>,
    ) -> Self {
        let orchestrator = Arc::new(DownloadOrchestrator::from_config(
            &config,
            retriever,
            Arc::clone(&gateway),
        ));
        Self {
            search: SearchAggregator::new(catalog, fallback),
            config,
            orchestrator,
            gateway,
        }
    }

    /// Build the production stack: YouTube Music catalog plus yt-dlp.
    pub fn with_default_backends(config: BotConfig, gateway: Arc<dyn DeliveryGateway>) -> Self {
        let catalog: Option<Arc<dyn CatalogSearch>> =
            match YtMusicClient::new(config.search.language.clone(), config.network.proxy.as_deref()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!("catalog client unavailable, using video search only: {}", e);
                    None
                }
            };
        let ytdlp = Arc::new(YtDlp::new(
            config.download.ytdlp_bin.clone(),
            config.network.user_agents.clone(),
        ));
        Self::new(config, catalog, ytdlp.clone(), ytdlp, gateway)
    }

    /// Install tracing, load configuration and build the production stack for `token`.
    pub fn start(token: &str) -> Result<Self> {
        init_tracing();
        let config = BotConfig::load()?;
        config.validate().map_err(anyhow::Error::msg)?;
        info!(
            "cache dir {}, proxy {:?}",
            config.cache.dir.display(),
            config.network.proxy
        );
        Ok(Self::with_default_backends(
            config,
            Arc::new(TelegramGateway::new(token)?),
        ))
    }

    pub fn orchestrator(&self) -> &Arc<DownloadOrchestrator> {
        &self.orchestrator
    }

    pub async fn handle_query(&self, query: &str) -> SearchReply {
        info!("received search query: {}", query);
        let results = self
            .search
            .search(
                query,
                self.config.search.max_results,
                self.config.network.proxy.as_deref(),
            )
            .await;
        SearchReply::from_candidates(&results)
    }

    /// Handle a result-button press on `message`.
    ///
    /// Returns the spawned delivery task for download actions.
    pub async fn handle_callback(
        &self,
        message: MessageRef,
        data: &str,
    ) -> Result<Option<JoinHandle<DeliveryOutcome>>> {
        info!("callback received: {}", data);
        match parse_callback(data) {
            BotAction::Download(id) => {
                self.gateway
                    .edit_text(
                        message,
                        &format!("Request received for track ID: {}. Preparing download...", id),
                    )
                    .await?;
                let request = self.request_for(id, message.chat);
                let status = Arc::new(MessageStatus::new(
                    Arc::clone(&self.gateway),
                    message.chat,
                    Some(message),
                ));
                Ok(Some(self.orchestrator.spawn_delivery(request, status)))
            }
            BotAction::Unknown(data) => {
                self.gateway
                    .edit_text(message, &format!("Unknown action: {}", data))
                    .await?;
                Ok(None)
            }
        }
    }

    pub fn request_for(&self, id: String, chat: ChatId) -> DownloadRequest {
        DownloadRequest::new(id, chat)
            .with_proxy(self.config.network.proxy.clone())
            .with_cookie_file(self.config.network.cookie_file_if_present())
    }
}
