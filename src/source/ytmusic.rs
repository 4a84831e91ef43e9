// YouTube Music catalog search over the public web client endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::traits::{CatalogItem, CatalogSearch, SearchFilter};
use crate::config::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};

const SEARCH_ENDPOINT: &str = "https://music.youtube.com/youtubei/v1/search?alt=json";
const CLIENT_NAME: &str = "WEB_REMIX";
const CLIENT_VERSION: &str = "1.20240424.01.00";

impl SearchFilter {
    /// Encoded filter parameter understood by the search endpoint.
    pub fn params(self) -> &'static str {
        match self {
            SearchFilter::Songs => "EgWKAQIIAWoMEA4QChADEAQQCRAF",
            SearchFilter::Videos => "EgWKAQIQAWoMEA4QChADEAQQCRAF",
        }
    }
}

pub struct YtMusicClient {
    client: Client,
    endpoint: String,
    language: String,
}

impl YtMusicClient {
    pub fn new(language: impl Into<String>, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: SEARCH_ENDPOINT.to_string(),
            language: language.into(),
        })
    }

    /// Point the client at a different endpoint (used by tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, query: &str, filter: SearchFilter) -> Value {
        json!({
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION,
                    "hl": self.language,
                }
            },
            "query": query,
            "params": filter.params(),
        })
    }
}

#[async_trait]
impl CatalogSearch for YtMusicClient {
    async fn search(
        &self,
        query: &str,
        filter: SearchFilter,
        limit: usize,
    ) -> Result<Vec<CatalogItem>> {
        info!("catalog search query={:?} filter={:?} limit={}", query, filter, limit);
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Origin", "https://music.youtube.com")
            .json(&self.request_body(query, filter))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("catalog search failed: HTTP {}", status.as_u16()));
        }

        let body: Value = resp.json().await?;
        let mut items = parse_search_response(&body);
        items.truncate(limit);
        debug!("catalog search returned {} items", items.len());
        Ok(items)
    }
}

/// Extract result rows from a search response.
pub fn parse_search_response(body: &Value) -> Vec<CatalogItem> {
    let sections = body
        .pointer("/contents/tabbedSearchResultsRenderer/tabs/0/tabRenderer/content/sectionListRenderer/contents")
        .and_then(Value::as_array);

    let Some(sections) = sections else {
        return Vec::new();
    };

    sections
        .iter()
        .filter_map(|s| s.pointer("/musicShelfRenderer/contents").and_then(Value::as_array))
        .flatten()
        .filter_map(|row| row.get("musicResponsiveListItemRenderer"))
        .map(parse_list_item)
        .collect()
}

fn runs(column: &Value) -> Vec<&Value> {
    column
        .pointer("/musicResponsiveListItemFlexColumnRenderer/text/runs")
        .and_then(Value::as_array)
        .map(|r| r.iter().collect())
        .unwrap_or_default()
}

fn run_text(run: &Value) -> Option<&str> {
    run.get("text").and_then(Value::as_str)
}

fn page_type(run: &Value) -> Option<&str> {
    run.pointer("/navigationEndpoint/browseEndpoint/browseEndpointContextSupportedConfigs/browseEndpointContextMusicConfig/pageType")
        .and_then(Value::as_str)
}

fn looks_like_duration(text: &str) -> bool {
    let parts: Vec<&str> = text.split(':').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn parse_list_item(item: &Value) -> CatalogItem {
    let video_id = item
        .pointer("/playlistItemData/videoId")
        .or_else(|| {
            item.pointer("/overlay/musicItemThumbnailOverlayRenderer/content/musicPlayButtonRenderer/playNavigationEndpoint/watchEndpoint/videoId")
        })
        .and_then(Value::as_str)
        .map(str::to_string);

    let columns: Vec<&Value> = item
        .get("flexColumns")
        .and_then(Value::as_array)
        .map(|c| c.iter().collect())
        .unwrap_or_default();

    let title = columns
        .first()
        .and_then(|c| runs(c).first().copied().and_then(run_text))
        .map(str::to_string);

    let detail_runs = columns.get(1).map(|c| runs(c)).unwrap_or_default();

    let artists: Vec<String> = detail_runs
        .iter()
        .filter(|r| page_type(r) == Some("MUSIC_PAGE_TYPE_ARTIST"))
        .filter_map(|r| run_text(r))
        .map(str::to_string)
        .collect();

    // Videos credit a channel without an artist page; it is the first text run.
    let uploader = if artists.is_empty() {
        detail_runs
            .iter()
            .filter_map(|r| run_text(r))
            .map(str::trim)
            .find(|t| !t.is_empty() && *t != "•" && *t != "Video" && *t != "Song")
            .map(str::to_string)
    } else {
        None
    };

    let duration_text = detail_runs
        .iter()
        .filter_map(|r| run_text(r))
        .rev()
        .find(|t| looks_like_duration(t))
        .map(str::to_string);

    let thumbnails = item
        .pointer("/thumbnail/musicThumbnailRenderer/thumbnail/thumbnails")
        .and_then(Value::as_array)
        .map(|t| {
            t.iter()
                .filter_map(|th| th.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    CatalogItem {
        video_id,
        title,
        artists,
        uploader,
        duration_seconds: None,
        duration_text,
        thumbnails,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist_run(name: &str) -> Value {
        json!({
            "text": name,
            "navigationEndpoint": {"browseEndpoint": {"browseEndpointContextSupportedConfigs": {
                "browseEndpointContextMusicConfig": {"pageType": "MUSIC_PAGE_TYPE_ARTIST"}}}}
        })
    }

    fn row(id: &str, title: &str, detail: Vec<Value>) -> Value {
        json!({"musicResponsiveListItemRenderer": {
            "playlistItemData": {"videoId": id},
            "thumbnail": {"musicThumbnailRenderer": {"thumbnail": {"thumbnails": [
                {"url": "https://img/small.jpg"}, {"url": "https://img/large.jpg"}]}}},
            "flexColumns": [
                {"musicResponsiveListItemFlexColumnRenderer": {"text": {"runs": [{"text": title}]}}},
                {"musicResponsiveListItemFlexColumnRenderer": {"text": {"runs": detail}}}
            ]
        }})
    }

    fn response(rows: Vec<Value>) -> Value {
        json!({"contents": {"tabbedSearchResultsRenderer": {"tabs": [{"tabRenderer": {"content": {
            "sectionListRenderer": {"contents": [{"musicShelfRenderer": {"contents": rows}}]}}}}]}}})
    }

    #[test]
    fn test_parse_song_rows() {
        let body = response(vec![row(
            "7wtfhZwyrcc",
            "Believer",
            vec![
                artist_run("Imagine Dragons"),
                json!({"text": " & "}),
                artist_run("Lil Wayne"),
                json!({"text": " • "}),
                json!({"text": "Evolve"}),
                json!({"text": " • "}),
                json!({"text": "3:24"}),
            ],
        )]);

        let items = parse_search_response(&body);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.video_id.as_deref(), Some("7wtfhZwyrcc"));
        assert_eq!(item.title.as_deref(), Some("Believer"));
        assert_eq!(item.artists, vec!["Imagine Dragons", "Lil Wayne"]);
        assert!(item.uploader.is_none());
        assert_eq!(item.duration_text.as_deref(), Some("3:24"));
        assert_eq!(item.thumbnails.last().map(String::as_str), Some("https://img/large.jpg"));
    }

    #[test]
    fn test_parse_video_row_uses_channel() {
        let body = response(vec![row(
            "abc",
            "Believer (Official Video)",
            vec![
                json!({"text": "ImagineDragonsVEVO"}),
                json!({"text": " • "}),
                json!({"text": "2.1B views"}),
                json!({"text": " • "}),
                json!({"text": "1:02:03"}),
            ],
        )]);
        let items = parse_search_response(&body);
        assert_eq!(items[0].uploader.as_deref(), Some("ImagineDragonsVEVO"));
        assert_eq!(items[0].duration_text.as_deref(), Some("1:02:03"));
    }

    #[test]
    fn test_parse_empty_response() {
        assert!(parse_search_response(&json!({})).is_empty());
    }

    #[test]
    fn test_filter_params_differ() {
        assert_ne!(SearchFilter::Songs.params(), SearchFilter::Videos.params());
    }
}
