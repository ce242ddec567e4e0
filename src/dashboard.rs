//! Dashboard assembly and the background refresh driver

use crate::config::{Config, PageConfig};
use crate::connectivity::ConnectivityProbe;
use crate::errors::{DashboardError, Result};
use crate::fetch::HttpClients;
use crate::history::UptimeHistory;
use crate::page::{Column, Page};
use crate::widget::Widget;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info};
use uuid::Uuid;

/// Shared services handed to widgets at construction.
///
/// Widgets hold `Arc`s into these, so every monitor on every page feeds
/// the same uptime history and connectivity cache.
#[derive(Clone)]
pub struct Providers {
    pub clients: Arc<HttpClients>,
    pub history: Arc<UptimeHistory>,
    pub connectivity: Arc<ConnectivityProbe>,
}

impl Providers {
    pub fn new() -> Result<Self> {
        let clients = Arc::new(HttpClients::new()?);
        let connectivity = Arc::new(ConnectivityProbe::new(clients.default.clone()));

        Ok(Self {
            clients,
            history: Arc::new(UptimeHistory::new()),
            connectivity,
        })
    }
}

pub struct Dashboard {
    pages: Vec<Arc<Page>>,
    refresh_interval: Duration,
    warmup: Duration,
}

impl Dashboard {
    /// Build every page and widget from a configuration, validating it
    /// first.
    pub async fn new(config: Config, providers: &Providers) -> Result<Self> {
        config.validate().map_err(DashboardError::Config)?;

        let refresh_interval = config.refresh_interval();
        let warmup = config.warmup();

        let mut pages = Vec::with_capacity(config.pages.len());
        for page_config in config.pages {
            pages.push(Arc::new(build_page(page_config, providers).await?));
        }

        info!(pages = pages.len(), "dashboard assembled");

        Ok(Self {
            pages,
            refresh_interval,
            warmup,
        })
    }

    pub fn pages(&self) -> &[Arc<Page>] {
        &self.pages
    }

    pub fn page(&self, slug: &str) -> Option<&Arc<Page>> {
        self.pages.iter().find(|page| page.slug() == slug)
    }

    /// One refresh pass over every page. Pages run concurrently; widgets
    /// within a page are serialized against readers by the page's own lock.
    pub async fn refresh_all_pages(&self) {
        let pass_id = Uuid::new_v4();
        let started = Instant::now();
        debug!(pass = %pass_id, pages = self.pages.len(), "starting dashboard refresh pass");

        join_all(self.pages.iter().map(|page| page.refresh_due_widgets())).await;

        debug!(
            pass = %pass_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dashboard refresh pass complete"
        );
    }

    /// Drive periodic refresh passes until the task is cancelled.
    ///
    /// A short warm-up delay lets the process settle, then an immediate
    /// pass fills the dashboard without waiting a whole interval.
    pub async fn run_background_refresh(&self) {
        sleep(self.warmup).await;
        self.refresh_all_pages().await;

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately and would double up with
        // the warm-up pass.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.refresh_all_pages().await;
        }
    }
}

async fn build_page(config: PageConfig, providers: &Providers) -> Result<Page> {
    let slug = config.effective_slug();

    let mut head_widgets = Vec::with_capacity(config.head_widgets.len());
    for widget_config in config.head_widgets {
        head_widgets.push(build_widget(widget_config, providers).await?);
    }

    let mut columns = Vec::with_capacity(config.columns.len());
    for column_config in config.columns {
        let mut widgets = Vec::with_capacity(column_config.widgets.len());
        for widget_config in column_config.widgets {
            widgets.push(build_widget(widget_config, providers).await?);
        }
        columns.push(Column {
            size: column_config.size,
            widgets,
        });
    }

    debug!(
        page = %slug,
        widgets = head_widgets.len() + columns.iter().map(|c| c.widgets.len()).sum::<usize>(),
        "page built"
    );

    Ok(Page::new(slug, config.title, head_widgets, columns))
}

async fn build_widget(
    config: crate::config::WidgetConfig,
    providers: &Providers,
) -> Result<Widget> {
    let mut widget = Widget::from_config(config, providers);
    widget.initialize().await?;
    Ok(widget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_config() -> Config {
        serde_json::from_str(
            r#"{
                "refresh_interval_seconds": 60,
                "pages": [
                    {
                        "title": "Home Lab",
                        "head_widgets": [ { "type": "clock" } ],
                        "columns": [
                            {
                                "size": "small",
                                "widgets": [
                                    {
                                        "type": "monitor",
                                        "sites": [
                                            { "title": "Router", "url": "http://192.168.1.1" }
                                        ]
                                    }
                                ]
                            }
                        ]
                    },
                    {
                        "title": "News",
                        "columns": [
                            {
                                "widgets": [
                                    {
                                        "type": "feeds",
                                        "feeds": [ { "url": "https://example.com/feed.json" } ]
                                    }
                                ]
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_from_config() {
        let providers = Providers::new().unwrap();
        let dashboard = Dashboard::new(sample_config(), &providers).await.unwrap();

        assert_eq!(dashboard.pages().len(), 2);
        assert!(dashboard.page("home-lab").is_some());
        assert!(dashboard.page("news").is_some());
        assert!(dashboard.page("missing").is_none());

        let summaries = dashboard.page("home-lab").unwrap().widget_summaries().await;
        assert_eq!(summaries.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let providers = Providers::new().unwrap();
        let result = Dashboard::new(Config::default(), &providers).await;

        assert!(matches!(result, Err(DashboardError::Config(_))));
    }

    #[tokio::test]
    async fn test_refresh_all_pages_fills_widgets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Release Notes",
                "items": [
                    {
                        "url": "https://blog.example.com/v2",
                        "title": "Version 2.0",
                        "date_published": "2025-06-01T00:00:00Z"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let config: Config = serde_json::from_str(&format!(
            r#"{{
                "refresh_interval_seconds": 60,
                "pages": [
                    {{
                        "title": "News",
                        "head_widgets": [ {{ "type": "clock" }} ],
                        "columns": [
                            {{
                                "widgets": [
                                    {{ "type": "feeds", "feeds": [ {{ "url": "{}/feed.json" }} ] }}
                                ]
                            }}
                        ]
                    }}
                ]
            }}"#,
            server.uri()
        ))
        .unwrap();

        let providers = Providers::new().unwrap();
        let dashboard = Dashboard::new(config, &providers).await.unwrap();
        dashboard.refresh_all_pages().await;

        let page = dashboard.page("news").unwrap();
        for summary in page.widget_summaries().await {
            assert!(summary.content_available, "{} still empty", summary.title);
            assert!(summary.error.is_none());
        }

        let html = page.render().await;
        assert!(html.contains("Version 2.0"));
        assert!(html.contains("Release Notes"));
    }
}
