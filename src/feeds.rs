//! Feed aggregation widget
//!
//! Fetches several JSON feeds concurrently through the worker pool, merges
//! their items into one newest-first list, and keeps serving the last good
//! list when a refresh fails. ETag and Last-Modified values are remembered
//! per feed so unchanged feeds cost a 304 instead of a full download.

use crate::config::{FeedConfig, FeedsConfig};
use crate::dashboard::Providers;
use crate::errors::{FetchError, RenderError, Result, UpdateError};
use crate::fetch::{HttpClients, read_body_limited};
use crate::widget::{WidgetState, escape_html, fanout_outcome};
use crate::worker;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::error;

const FEED_WORKERS: usize = 30;
const DEFAULT_ITEM_LIMIT: usize = 25;
const DEFAULT_CACHE: Duration = Duration::from_secs(2 * 60 * 60);
const MAX_FEED_BODY_BYTES: usize = 5 * 1024 * 1024;

/// One entry in the merged feed list.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub channel_name: String,
    pub channel_url: String,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct CachedFeed {
    etag: Option<String>,
    last_modified: Option<String>,
    items: Vec<FeedItem>,
}

type FeedCache = Arc<Mutex<HashMap<String, CachedFeed>>>;

#[derive(Debug, Clone)]
struct FeedRequest {
    url: String,
    title: Option<String>,
    headers: HashMap<String, String>,
    limit: Option<usize>,
    item_link_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    home_page_url: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedEntry>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date_published: Option<DateTime<Utc>>,
}

async fn fetch_feed_task(
    clients: Arc<HttpClients>,
    cache: FeedCache,
    request: FeedRequest,
) -> std::result::Result<Vec<FeedItem>, FetchError> {
    let mut builder = clients.default.get(&request.url);

    {
        let cache = cache.lock().unwrap();
        if let Some(cached) = cache.get(&request.url) {
            if let Some(etag) = &cached.etag {
                builder = builder.header(header::IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &cached.last_modified {
                builder = builder.header(header::IF_MODIFIED_SINCE, last_modified);
            }
        }
    }

    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    let response = builder.send().await.map_err(FetchError::Http)?;
    let status = response.status();

    if status == StatusCode::NOT_MODIFIED {
        let cache = cache.lock().unwrap();
        return Ok(cache
            .get(&request.url)
            .map(|cached| cached.items.clone())
            .unwrap_or_default());
    }

    if status != StatusCode::OK {
        return Err(FetchError::Status {
            code: status.as_u16(),
            url: request.url.clone(),
            body: String::new(),
        });
    }

    let etag = header_string(response.headers().get(header::ETAG));
    let last_modified = header_string(response.headers().get(header::LAST_MODIFIED));

    let body = read_body_limited(response, MAX_FEED_BODY_BYTES).await?;
    let document: JsonFeedDocument = serde_json::from_slice(&body).map_err(FetchError::Json)?;
    let items = items_from_document(document, &request);

    // Only feeds that offer a validator are worth remembering.
    if etag.is_some() || last_modified.is_some() {
        cache.lock().unwrap().insert(
            request.url.clone(),
            CachedFeed {
                etag,
                last_modified,
                items: items.clone(),
            },
        );
    }

    Ok(items)
}

fn header_string(value: Option<&header::HeaderValue>) -> Option<String> {
    value.and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn items_from_document(document: JsonFeedDocument, request: &FeedRequest) -> Vec<FeedItem> {
    let channel_name = request
        .title
        .clone()
        .or_else(|| document.title.clone())
        .unwrap_or_else(|| request.url.clone());
    let channel_url = document
        .home_page_url
        .clone()
        .unwrap_or_else(|| request.url.clone());

    let mut items = Vec::new();
    for entry in document.items {
        let raw_link = entry
            .url
            .or(entry.external_url)
            .unwrap_or_default();
        if raw_link.is_empty() {
            continue;
        }

        let link = absolutize_link(&raw_link, request, &channel_url);
        let title = match entry.title {
            Some(title) if !title.is_empty() => title,
            _ => link.clone(),
        };

        items.push(FeedItem {
            channel_name: channel_name.clone(),
            channel_url: channel_url.clone(),
            title,
            link,
            published_at: entry.date_published.unwrap_or_else(Utc::now),
        });

        if let Some(limit) = request.limit {
            if items.len() >= limit {
                break;
            }
        }
    }

    items
}

fn absolutize_link(raw: &str, request: &FeedRequest, channel_url: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }

    if let Some(prefix) = &request.item_link_prefix {
        return format!("{}{}", prefix, raw);
    }

    // Resolve against the channel's home page, then the feed URL itself.
    for base in [channel_url, request.url.as_str()] {
        if let Ok(base_url) = reqwest::Url::parse(base) {
            if let Ok(joined) = base_url.join(raw) {
                return joined.to_string();
            }
        }
    }

    raw.to_string()
}

pub struct FeedsWidget {
    pub(crate) state: WidgetState,
    requests: Vec<FeedRequest>,
    limit: usize,
    preserve_order: bool,
    items: Vec<FeedItem>,
    cache: FeedCache,
    clients: Arc<HttpClients>,
}

impl FeedsWidget {
    pub fn new(config: FeedsConfig, providers: &Providers) -> Self {
        let state = WidgetState::new(config.common.title_or("Feeds"))
            .with_custom_cache(config.common.custom_cache())
            .with_hide_header(config.common.hide_header);

        let requests = config
            .feeds
            .into_iter()
            .map(|feed: FeedConfig| FeedRequest {
                url: feed.url,
                title: feed.title,
                headers: feed.headers,
                limit: feed.limit,
                item_link_prefix: feed.item_link_prefix,
            })
            .collect();

        Self {
            state,
            requests,
            limit: config.limit.unwrap_or(DEFAULT_ITEM_LIMIT),
            preserve_order: config.preserve_order,
            items: Vec::new(),
            cache: Arc::new(Mutex::new(HashMap::new())),
            clients: Arc::clone(&providers.clients),
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.state.set_cache_duration(DEFAULT_CACHE);
        Ok(())
    }

    pub async fn update(&mut self) {
        let (mut items, outcome) = self.fetch_all().await;

        // A cycle that produced nothing keeps the previous item list.
        if !self.state.handle_update_result(Utc::now(), outcome) {
            return;
        }

        if !self.preserve_order {
            items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        }
        items.truncate(self.limit);
        self.items = items;
    }

    async fn fetch_all(&self) -> (Vec<FeedItem>, std::result::Result<(), UpdateError>) {
        let total = self.requests.len();
        let clients = Arc::clone(&self.clients);
        let cache = Arc::clone(&self.cache);

        let outcome = worker::job(
            move |request: FeedRequest| {
                fetch_feed_task(Arc::clone(&clients), Arc::clone(&cache), request)
            },
            self.requests.clone(),
        )
        .with_workers(FEED_WORKERS)
        .run()
        .await;

        let results = match outcome {
            Ok(results) => results,
            Err(err) => {
                error!(widget = self.state.title(), error = %err, "feed fetches failed to run");
                return (Vec::new(), Err(UpdateError::NoContent(Some(err.to_string()))));
            }
        };

        let mut items = Vec::new();
        let mut seen_links = HashSet::new();
        let mut failed = 0;

        for (request, result) in self.requests.iter().zip(results) {
            match result {
                Ok(feed_items) => {
                    for item in feed_items {
                        // The same story can appear in more than one feed.
                        if !seen_links.insert(item.link.clone()) {
                            continue;
                        }
                        items.push(item);
                    }
                }
                Err(err) => {
                    failed += 1;
                    error!(feed = %request.url, error = %err, "failed to fetch feed");
                }
            }
        }

        (items, fanout_outcome(failed, total))
    }

    pub fn render_content(&self) -> std::result::Result<String, RenderError> {
        let mut html = String::new();
        write!(html, "<div class=\"widget-content feeds\">")?;

        if self.items.is_empty() {
            write!(html, "<div class=\"feeds-empty\">No items to show.</div>")?;
        } else {
            write!(html, "<ul class=\"feed-list\">")?;
            for item in &self.items {
                write!(html, "<li class=\"feed-item\">")?;
                write!(
                    html,
                    "<a class=\"feed-item-title\" href=\"{}\">{}</a>",
                    escape_html(&item.link),
                    escape_html(&item.title)
                )?;
                write!(
                    html,
                    "<a class=\"feed-item-channel\" href=\"{}\">{}</a>",
                    escape_html(&item.channel_url),
                    escape_html(&item.channel_name)
                )?;
                write!(
                    html,
                    "<time datetime=\"{}\">{}</time>",
                    item.published_at.to_rfc3339(),
                    item.published_at.format("%b %-d")
                )?;
                write!(html, "</li>")?;
            }
            write!(html, "</ul>")?;
        }

        write!(html, "</div>")?;
        Ok(html)
    }
}
