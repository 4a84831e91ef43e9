// yt-dlp backend: fallback video search plus metadata and audio retrieval.

use std::process::Stdio;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::{
    DownloadOptions, MediaRetriever, RetrievalOptions, TrackInfo, VideoEntry, VideoSearch,
};
use crate::config::ACCEPT_LANGUAGE;
use crate::engine::antiblock::pick_user_agent;
use crate::error::RetrievalError;

/// Drives an external `yt-dlp` executable.
pub struct YtDlp {
    bin: String,
    user_agents: Vec<String>,
}

impl YtDlp {
    pub fn new(bin: impl Into<String>, user_agents: Vec<String>) -> Self {
        Self {
            bin: bin.into(),
            user_agents,
        }
    }

    async fn run(&self, args: &[String]) -> std::result::Result<Vec<u8>, RetrievalError> {
        debug!("running {} with {} args", self.bin, args.len());
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RetrievalError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} exited with {}: {}", self.bin, output.status, stderr.trim());
            return Err(RetrievalError::classify(&stderr));
        }
        Ok(output.stdout)
    }
}

/// Flags shared by every invocation: identity, network, credentials.
pub fn common_args(opts: &RetrievalOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--no-warnings".into(),
        "--source-address".into(),
        "0.0.0.0".into(),
        "--geo-bypass".into(),
        "--force-ipv4".into(),
        "--user-agent".into(),
        opts.user_agent.clone(),
        "--add-header".into(),
        format!("Accept-Language:{}", ACCEPT_LANGUAGE),
    ];
    if let Some(cookies) = &opts.cookie_file {
        args.push("--cookies".into());
        args.push(cookies.to_string_lossy().into_owned());
    }
    if let Some(proxy) = &opts.proxy {
        args.push("--proxy".into());
        args.push(proxy.clone());
    }
    args
}

pub fn info_args(url: &str, opts: &RetrievalOptions) -> Vec<String> {
    let mut args = common_args(opts);
    args.extend(
        ["--dump-json", "--skip-download", "--no-playlist"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(url.to_string());
    args
}

pub fn download_args(url: &str, opts: &DownloadOptions) -> Vec<String> {
    let mut args = common_args(&opts.base);
    args.extend([
        "--quiet".to_string(),
        "--format".into(),
        opts.format.clone(),
        "--output".into(),
        opts.output_template.clone(),
        "--force-overwrites".into(),
        "--no-playlist".into(),
        "--retries".into(),
        opts.retries.to_string(),
        "--fragment-retries".into(),
        opts.fragment_retries.to_string(),
        "--retry-sleep".into(),
        format!("http:{}", opts.retry_sleep_secs),
        "--throttled-rate".into(),
        opts.throttled_rate.clone(),
        "--sleep-requests".into(),
        format!("{:.2}", opts.request_sleep_secs),
        "--embed-metadata".into(),
        "--extract-audio".into(),
        "--audio-format".into(),
        "mp3".into(),
        "--audio-quality".into(),
        format!("{}K", opts.audio_bitrate_kbps),
    ]);
    args.push(url.to_string());
    args
}

pub fn search_args(query: &str, proxy: Option<&str>, user_agent: String) -> Vec<String> {
    let opts = RetrievalOptions {
        proxy: proxy.map(str::to_string),
        user_agent,
        cookie_file: None,
    };
    let mut args = common_args(&opts);
    args.extend(
        ["--flat-playlist", "--dump-single-json", "--no-playlist"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(query.to_string());
    args
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: String,
    title: Option<String>,
    artist: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<RawThumbnail>,
}

#[derive(Debug, Deserialize)]
struct RawPlaylist {
    #[serde(default)]
    entries: Vec<Option<RawEntry>>,
}

/// Parse `--dump-json` output.
pub fn parse_info(stdout: &[u8]) -> Result<TrackInfo> {
    let raw: RawInfo = serde_json::from_slice(stdout)?;
    Ok(TrackInfo {
        id: raw.id,
        title: raw.title,
        artist: raw.artist,
        uploader: raw.uploader,
        channel: raw.channel,
        duration: raw.duration,
        webpage_url: raw.webpage_url,
    })
}

/// Parse `--flat-playlist --dump-single-json` search output.
pub fn parse_search(stdout: &[u8]) -> Result<Vec<VideoEntry>> {
    let raw: RawPlaylist = serde_json::from_slice(stdout)?;
    Ok(raw
        .entries
        .into_iter()
        .flatten()
        .map(|e| {
            let thumbnail = e
                .thumbnail
                .or_else(|| e.thumbnails.into_iter().rev().find_map(|t| t.url));
            VideoEntry {
                id: e.id,
                title: e.title,
                duration: e.duration.filter(|d| *d > 0.0).map(|d| d as u64),
                channel: e.channel,
                uploader: e.uploader,
                thumbnail,
            }
        })
        .collect())
}

#[async_trait]
impl VideoSearch for YtDlp {
    async fn search(&self, query: &str, proxy: Option<&str>) -> Result<Vec<VideoEntry>> {
        let args = search_args(query, proxy, pick_user_agent(&self.user_agents));
        info!("executing yt-dlp search: {}", query);
        let stdout = self
            .run(&args)
            .await
            .map_err(|e| anyhow!("yt-dlp search failed: {}", e))?;
        let entries = parse_search(&stdout)?;
        debug!("yt-dlp search returned {} entries", entries.len());
        Ok(entries)
    }
}

#[async_trait]
impl MediaRetriever for YtDlp {
    async fn extract_info(
        &self,
        url: &str,
        opts: &RetrievalOptions,
    ) -> std::result::Result<TrackInfo, RetrievalError> {
        let stdout = self.run(&info_args(url, opts)).await?;
        parse_info(&stdout).map_err(|e| RetrievalError::Failed(format!("bad info json: {}", e)))
    }

    async fn download(
        &self,
        url: &str,
        opts: &DownloadOptions,
    ) -> std::result::Result<(), RetrievalError> {
        self.run(&download_args(url, opts)).await.map(|_| ())
    }
}
