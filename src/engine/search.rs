// Search aggregation. Catalog backend first, generic video search as fallback.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::music_url;
use crate::source::traits::{CatalogItem, CatalogSearch, SearchFilter, VideoEntry, VideoSearch};

const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// One search hit offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackCandidate {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// 0 means unknown.
    pub duration_seconds: u64,
    pub thumbnail_url: Option<String>,
}

impl TrackCandidate {
    pub fn url(&self) -> String {
        music_url(&self.id)
    }
}

/// Parse `"MM:SS"` or `"HH:MM:SS"` into seconds; anything else is 0.
pub fn parse_duration(text: &str) -> u64 {
    let parts: Option<Vec<u64>> = text
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<u64>().ok())
        .collect();

    let total = match parts.as_deref() {
        Some([m, s]) => m.checked_mul(60).and_then(|v| v.checked_add(*s)),
        Some([h, m, s]) => h
            .checked_mul(3600)
            .and_then(|v| v.checked_add(m.checked_mul(60)?))
            .and_then(|v| v.checked_add(*s)),
        _ => None,
    };
    total.unwrap_or(0)
}

/// Split `"A - B"` into `(artist, title)` when one side names the channel or uploader.
pub fn split_artist_title(
    title: &str,
    channel: Option<&str>,
    uploader: Option<&str>,
) -> Option<(String, String)> {
    let (left, right) = title.split_once(" - ")?;
    let (left, right) = (left.trim(), right.trim());

    let names: Vec<String> = [channel, uploader]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .collect();
    let matches = |side: &str| names.iter().any(|n| *n == side.to_lowercase());

    if matches(left) {
        Some((left.to_string(), right.to_string()))
    } else if matches(right) {
        Some((right.to_string(), left.to_string()))
    } else {
        None
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// Normalize a catalog item; `None` if it lacks an id or title.
pub fn normalize_catalog_item(item: CatalogItem) -> Option<TrackCandidate> {
    let id = non_empty(item.video_id)?;
    let title = non_empty(item.title)?;

    let artist = if !item.artists.is_empty() {
        item.artists.join(", ")
    } else {
        non_empty(item.uploader).unwrap_or_else(|| UNKNOWN_ARTIST.to_string())
    };

    let duration_seconds = item
        .duration_seconds
        .filter(|d| *d > 0)
        .or_else(|| item.duration_text.as_deref().map(parse_duration))
        .unwrap_or(0);

    Some(TrackCandidate {
        id,
        title,
        artist,
        duration_seconds,
        thumbnail_url: item.thumbnails.into_iter().last(),
    })
}

/// Normalize a video-search entry; `None` if it lacks an id, title or duration.
pub fn normalize_video_entry(entry: VideoEntry) -> Option<TrackCandidate> {
    let id = non_empty(entry.id)?;
    let raw_title = non_empty(entry.title)?;
    let duration_seconds = entry.duration.filter(|d| *d > 0)?;

    let channel = non_empty(entry.channel);
    let uploader = non_empty(entry.uploader);

    let (artist, title) =
        match split_artist_title(&raw_title, channel.as_deref(), uploader.as_deref()) {
            Some(split) => split,
            None => {
                let artist = channel
                    .clone()
                    .or_else(|| uploader.clone())
                    .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
                (artist, raw_title)
            }
        };

    Some(TrackCandidate {
        id,
        title,
        artist,
        duration_seconds,
        thumbnail_url: entry.thumbnail,
    })
}

pub struct SearchAggregator {
    catalog: Option<Arc<dyn CatalogSearch>>,
    fallback: Arc<dyn VideoSearch>,
}

impl SearchAggregator {
    /// `catalog` may be `None` when the catalog client could not be created.
    pub fn new(catalog: Option<Arc<dyn CatalogSearch>>, fallback: Arc<dyn VideoSearch>) -> Self {
        Self { catalog, fallback }
    }

    /// Search for `query`. Never fails; total failure yields an empty list.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        proxy: Option<&str>,
    ) -> Vec<TrackCandidate> {
        let max_results = max_results.max(1);
        info!(
            "starting search for query={:?} max_results={} proxy={:?}",
            query, max_results, proxy
        );

        let mut results = self.search_catalog(query, max_results).await;

        if results.is_empty() {
            info!("catalog yielded nothing for {:?}, falling back to video search", query);
            results = self.search_fallback(query, max_results, proxy).await;
        }

        if results.is_empty() {
            warn!("search for {:?} yielded no results from any backend", query);
        } else {
            info!("search for {:?} returning {} results", query, results.len());
        }
        results
    }

    async fn search_catalog(&self, query: &str, max_results: usize) -> Vec<TrackCandidate> {
        let Some(catalog) = &self.catalog else {
            return Vec::new();
        };

        let mut items = match catalog.search(query, SearchFilter::Songs, max_results).await {
            Ok(items) => items,
            Err(e) => {
                error!("catalog song search failed for {:?}: {}", query, e);
                return Vec::new();
            }
        };

        if items.is_empty() {
            info!("no songs for {:?}, trying video filter", query);
            items = match catalog.search(query, SearchFilter::Videos, max_results).await {
                Ok(items) => items,
                Err(e) => {
                    error!("catalog video search failed for {:?}: {}", query, e);
                    return Vec::new();
                }
            };
        }

        Self::collect(items, max_results, normalize_catalog_item, "catalog")
    }

    async fn search_fallback(
        &self,
        query: &str,
        max_results: usize,
        proxy: Option<&str>,
    ) -> Vec<TrackCandidate> {
        let prefixed = format!("ytsearch{}:{}", max_results, query);
        match self.fallback.search(&prefixed, proxy).await {
            Ok(entries) => Self::collect(entries, max_results, normalize_video_entry, "video"),
            Err(e) => {
                warn!("video search failed for {:?}: {}", query, e);
                Vec::new()
            }
        }
    }

    fn collect<T: std::fmt::Debug>(
        items: Vec<T>,
        max_results: usize,
        normalize: fn(T) -> Option<TrackCandidate>,
        backend: &str,
    ) -> Vec<TrackCandidate> {
        let mut out = Vec::with_capacity(max_results.min(items.len()));
        for item in items {
            if out.len() >= max_results {
                break;
            }
            let shown = format!("{:?}", item);
            match normalize(item) {
                Some(candidate) => out.push(candidate),
                None => warn!("skipping {} item with missing fields: {}", backend, shown),
            }
        }
        out
    }
}
