//! Page-level refresh orchestration
//!
//! A page owns its widgets behind a single async lock. Refresh passes and
//! renders both take that lock for their whole duration, so a reader never
//! observes a page where some widgets reflect one pass and some another.
//! Within a pass, all due widgets refresh concurrently.

use crate::config::ColumnSize;
use crate::widget::{Widget, WidgetSummary, escape_html};
use chrono::Utc;
use futures::future::join_all;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub struct Column {
    pub size: ColumnSize,
    pub widgets: Vec<Widget>,
}

pub struct PageContent {
    pub head_widgets: Vec<Widget>,
    pub columns: Vec<Column>,
}

impl PageContent {
    fn widgets(&self) -> impl Iterator<Item = &Widget> {
        self.head_widgets
            .iter()
            .chain(self.columns.iter().flat_map(|c| c.widgets.iter()))
    }

    fn widgets_mut(&mut self) -> impl Iterator<Item = &mut Widget> {
        self.head_widgets
            .iter_mut()
            .chain(self.columns.iter_mut().flat_map(|c| c.widgets.iter_mut()))
    }
}

pub struct Page {
    slug: String,
    title: String,
    content: Mutex<PageContent>,
}

impl Page {
    pub fn new(
        slug: String,
        title: String,
        mut head_widgets: Vec<Widget>,
        columns: Vec<Column>,
    ) -> Self {
        // Head widgets sit above the columns and never show a header.
        for widget in &mut head_widgets {
            widget.state_mut().set_hide_header(true);
        }

        Self {
            slug,
            title,
            content: Mutex::new(PageContent {
                head_widgets,
                columns,
            }),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Refresh every widget on the page that is currently due.
    pub async fn refresh_due_widgets(&self) {
        let mut content = self.content.lock().await;
        refresh_pass(&self.slug, &mut content).await;
    }

    /// Render the page fragment, refreshing due widgets first so a reader
    /// never receives content the page already knows to be stale.
    pub async fn render(&self) -> String {
        let mut content = self.content.lock().await;
        refresh_pass(&self.slug, &mut content).await;
        render_fragment(&self.slug, &mut content)
    }

    pub async fn widget_summaries(&self) -> Vec<WidgetSummary> {
        let content = self.content.lock().await;
        content.widgets().map(Widget::summary).collect()
    }
}

async fn refresh_pass(slug: &str, content: &mut PageContent) {
    let now = Utc::now();
    let due: Vec<&mut Widget> = content
        .widgets_mut()
        .filter(|widget| widget.requires_update(now))
        .collect();

    if due.is_empty() {
        return;
    }

    let pass_id = Uuid::new_v4();
    let count = due.len();
    let started = Instant::now();
    debug!(page = slug, pass = %pass_id, due = count, "refreshing due widgets");

    join_all(due.into_iter().map(|widget| widget.update())).await;

    debug!(
        page = slug,
        pass = %pass_id,
        due = count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "refresh pass complete"
    );
}

fn render_fragment(slug: &str, content: &mut PageContent) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<div class=\"page\" data-page=\"{}\">",
        escape_html(slug)
    ));

    if !content.head_widgets.is_empty() {
        html.push_str("<div class=\"page-head\">");
        for widget in &mut content.head_widgets {
            html.push_str(&widget.render());
        }
        html.push_str("</div>");
    }

    html.push_str("<div class=\"page-columns\">");
    for column in &mut content.columns {
        let size = match column.size {
            ColumnSize::Small => "small",
            ColumnSize::Full => "full",
        };
        html.push_str(&format!("<div class=\"page-column column-{}\">", size));
        for widget in &mut column.widgets {
            html.push_str(&widget.render());
        }
        html.push_str("</div>");
    }
    html.push_str("</div></div>");

    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockWidget;
    use crate::config::{ClockConfig, CommonWidgetConfig, HourFormat, WidgetConfig};
    use crate::connectivity::ConnectivityProbe;
    use crate::dashboard::Providers;
    use crate::fetch::HttpClients;
    use crate::history::UptimeHistory;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn clock_widget(title: &str) -> Widget {
        let mut inner = ClockWidget::new(ClockConfig {
            common: CommonWidgetConfig {
                title: Some(title.to_string()),
                ..CommonWidgetConfig::default()
            },
            hour_format: HourFormat::TwentyFourHour,
        });
        inner.initialize().unwrap();
        Widget::Clock(inner)
    }

    fn test_page() -> Page {
        Page::new(
            "test".to_string(),
            "Test".to_string(),
            vec![clock_widget("Head Clock")],
            vec![Column {
                size: ColumnSize::Full,
                widgets: vec![clock_widget("Column Clock")],
            }],
        )
    }

    #[tokio::test]
    async fn test_refresh_updates_all_due_widgets() {
        let page = test_page();

        for summary in page.widget_summaries().await {
            assert!(!summary.content_available);
        }

        page.refresh_due_widgets().await;

        for summary in page.widget_summaries().await {
            assert!(summary.content_available, "{} not refreshed", summary.title);
        }
    }

    #[tokio::test]
    async fn test_render_contains_every_widget() {
        let page = test_page();
        let html = page.render().await;

        assert!(html.contains("data-page=\"test\""));
        assert!(html.contains("page-head"));
        assert!(html.contains("column-full"));
        assert!(html.contains("Column Clock"));
        // Head widgets render without their headers.
        assert_eq!(html.matches("widget-header").count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_within_cache_window() {
        let page = test_page();
        page.refresh_due_widgets().await;
        let first = page.widget_summaries().await;

        // Nothing is due anymore, so a second pass changes nothing.
        page.refresh_due_widgets().await;
        let second = page.widget_summaries().await;

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.content_available, b.content_available);
            assert_eq!(a.error, b.error);
        }
    }

    async fn monitor_widget(server: &MockServer, providers: &Providers) -> Widget {
        let raw = format!(
            r#"{{ "type": "monitor", "sites": [ {{ "title": "Slow Site", "url": "{}" }} ] }}"#,
            server.uri()
        );
        let config: WidgetConfig = serde_json::from_str(&raw).unwrap();
        let mut widget = Widget::from_config(config, providers);
        widget.initialize().await.unwrap();
        widget
    }

    #[tokio::test]
    async fn test_render_waits_for_in_flight_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
            .mount(&server)
            .await;

        let clients = Arc::new(HttpClients::new().unwrap());
        let providers = Providers {
            clients: Arc::clone(&clients),
            history: Arc::new(UptimeHistory::new()),
            connectivity: Arc::new(
                ConnectivityProbe::new(clients.default.clone())
                    .with_endpoints(vec![server.uri()]),
            ),
        };

        let widget = monitor_widget(&server, &providers).await;
        let page = Arc::new(Page::new(
            "lab".to_string(),
            "Lab".to_string(),
            Vec::new(),
            vec![Column {
                size: ColumnSize::Full,
                widgets: vec![widget],
            }],
        ));

        let refresher = Arc::clone(&page);
        let refresh = tokio::spawn(async move { refresher.refresh_due_widgets().await });

        // Let the refresh pass take the page lock first.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let html = page.render().await;
        refresh.await.unwrap();

        // A reader never observes the half-finished pass.
        assert!(!html.contains("Pending"), "saw a partial pass: {html}");
        assert!(html.contains("status-ok"));
    }
}
