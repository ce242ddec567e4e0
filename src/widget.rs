//! Widget base state: caching, refresh scheduling, and failure handling
//!
//! Every widget owns a `WidgetState` that decides when the widget is due
//! for a refresh, how hard to retry after failures, and whether the last
//! completed refresh left anything displayable behind. The concrete widget
//! kinds plug into it through the `Widget` enum at the bottom of this file.

use crate::clock::ClockWidget;
use crate::config::WidgetConfig;
use crate::dashboard::Providers;
use crate::errors::{RenderError, Result, UpdateError};
use crate::feeds::FeedsWidget;
use crate::ip_address::PublicIpWidget;
use crate::monitor::MonitorWidget;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::error;

/// Failed refreshes are retried early, at `retries * retries` minutes,
/// with the retry count capped here.
pub const MAX_UPDATE_RETRIES: u32 = 5;

/// Fragment shown in place of a widget whose content failed to render.
pub(crate) const RENDER_ERROR_FRAGMENT: &str =
    "<div class=\"widget-content widget-render-error\">Failed to render widget.</div>";

static WIDGET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_widget_id() -> u64 {
    WIDGET_ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

/// How a widget's content goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Content never goes stale on its own.
    Infinite,
    /// Content goes stale a fixed duration after each scheduled refresh.
    Duration(Duration),
    /// Content goes stale at the top of the next hour.
    OnTheHour,
}

/// Decide the unit-level outcome of a fan-out refresh from its failure
/// count: every sub-request failing means no content, a subset failing
/// means partial content, and zero failures is a clean success.
pub fn fanout_outcome(failed: usize, total: usize) -> std::result::Result<(), UpdateError> {
    if total > 0 && failed >= total {
        Err(UpdateError::NoContent(None))
    } else if failed > 0 {
        Err(UpdateError::PartialContent { failed, total })
    } else {
        Ok(())
    }
}

/// Scheduling and availability state shared by every widget kind.
#[derive(Debug)]
pub struct WidgetState {
    id: u64,
    title: String,
    hide_header: bool,
    custom_cache: Option<Duration>,
    cache_policy: CachePolicy,
    next_update: Option<DateTime<Utc>>,
    update_retries: u32,
    content_available: bool,
    error: Option<String>,
    notice: Option<String>,
}

impl WidgetState {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: next_widget_id(),
            title: title.into(),
            hide_header: false,
            custom_cache: None,
            cache_policy: CachePolicy::Infinite,
            next_update: None,
            update_retries: 0,
            content_available: false,
            error: None,
            notice: None,
        }
    }

    /// Set the user-configured cache override applied by
    /// `set_cache_duration`.
    pub fn with_custom_cache(mut self, custom: Option<Duration>) -> Self {
        self.custom_cache = custom;
        self
    }

    pub fn with_hide_header(mut self, hide: bool) -> Self {
        self.hide_header = hide;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn hide_header(&self) -> bool {
        self.hide_header
    }

    pub(crate) fn set_hide_header(&mut self, hide: bool) {
        self.hide_header = hide;
    }

    pub fn content_available(&self) -> bool {
        self.content_available
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    /// Switch to a fixed-duration cache. The widget's configured override
    /// wins over `source_default` when present and non-zero.
    pub fn set_cache_duration(&mut self, source_default: Duration) {
        let effective = match self.custom_cache {
            Some(custom) if !custom.is_zero() => custom,
            _ => source_default,
        };
        self.cache_policy = CachePolicy::Duration(effective);
    }

    pub fn set_cache_on_the_hour(&mut self) {
        self.cache_policy = CachePolicy::OnTheHour;
    }

    /// Whether the widget should refresh now.
    ///
    /// A widget with no scheduled deadline is always due, and a deadline
    /// only passes once `now` is strictly after it. Checking never mutates
    /// anything, so callers may probe as often as they like.
    pub fn requires_update(&self, now: DateTime<Utc>) -> bool {
        if matches!(self.cache_policy, CachePolicy::Infinite) {
            return false;
        }

        match self.next_update {
            None => true,
            Some(due) => now > due,
        }
    }

    fn next_update_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.cache_policy {
            CachePolicy::Infinite => None,
            CachePolicy::Duration(d) => Some(add_duration(now, d)),
            CachePolicy::OnTheHour => {
                let seconds = (60 - i64::from(now.minute())) * 60 - i64::from(now.second());
                Some(
                    now.checked_add_signed(chrono::Duration::seconds(seconds))
                        .unwrap_or(now),
                )
            }
        }
    }

    /// Schedule the next refresh at the regular cadence and clear the
    /// retry counter.
    pub fn schedule_next_update(&mut self, now: DateTime<Utc>) {
        self.next_update = self.next_update_time(now);
        self.update_retries = 0;
    }

    /// Schedule a retry after a failed refresh.
    ///
    /// The delay grows quadratically with the number of consecutive
    /// failures but is never later than the regular cadence would be, so
    /// backing off cannot make a widget lazier than normal.
    pub fn schedule_early_update(&mut self, now: DateTime<Utc>) {
        self.update_retries = (self.update_retries + 1).min(MAX_UPDATE_RETRIES);
        let backoff_minutes = i64::from(self.update_retries * self.update_retries);
        let candidate = now
            .checked_add_signed(chrono::Duration::minutes(backoff_minutes))
            .unwrap_or(now);

        self.next_update = self
            .next_update_time(now)
            .map(|regular| candidate.min(regular));
    }

    /// Fold a refresh outcome into the state and report whether the widget
    /// may keep the content produced by this cycle.
    ///
    /// Success and partial content both leave the widget available; only a
    /// cycle that produced nothing at all marks it unavailable. Content
    /// already on screen from an earlier cycle is never touched here.
    pub fn handle_update_result(
        &mut self,
        now: DateTime<Utc>,
        result: std::result::Result<(), UpdateError>,
    ) -> bool {
        match result {
            Ok(()) => {
                self.error = None;
                self.notice = None;
                self.content_available = true;
                self.schedule_next_update(now);
                true
            }
            Err(UpdateError::PartialContent { failed, total }) => {
                self.schedule_early_update(now);
                self.notice = Some(UpdateError::PartialContent { failed, total }.to_string());
                self.error = None;
                self.content_available = true;
                true
            }
            Err(err) => {
                self.schedule_early_update(now);
                self.error = Some(err.to_string());
                self.notice = None;
                self.content_available = false;
                false
            }
        }
    }

    /// Run a fragment builder, falling back to a static placeholder if it
    /// fails. A render failure marks the widget unavailable and is logged,
    /// but no refresh is attempted in response.
    pub fn render_with<F>(&mut self, build: F) -> String
    where
        F: FnOnce() -> std::result::Result<String, RenderError>,
    {
        match build() {
            Ok(html) => html,
            Err(err) => {
                error!(
                    widget_id = self.id,
                    widget = %self.title,
                    error = %err,
                    "failed to render widget content"
                );
                self.content_available = false;
                self.error = Some(err.to_string());
                RENDER_ERROR_FRAGMENT.to_string()
            }
        }
    }
}

fn add_duration(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Escape text for inclusion in an HTML fragment.
pub(crate) fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap a widget's content in the shared frame: header, then an error or
/// notice banner when one is set, then the content itself.
pub(crate) fn frame_fragment(state: &WidgetState, body: &str) -> String {
    let mut html = String::with_capacity(body.len() + 256);
    html.push_str(&format!(
        "<div class=\"widget\" data-widget-id=\"{}\">",
        state.id()
    ));

    if !state.hide_header() {
        html.push_str(&format!(
            "<div class=\"widget-header\">{}</div>",
            escape_html(state.title())
        ));
    }

    if let Some(error) = state.error() {
        html.push_str(&format!(
            "<div class=\"widget-error\" title=\"{}\">Content unavailable</div>",
            escape_html(error)
        ));
    } else if let Some(notice) = state.notice() {
        html.push_str(&format!(
            "<div class=\"widget-notice\" title=\"{}\">Some content could not be retrieved</div>",
            escape_html(notice)
        ));
    }

    html.push_str(body);
    html.push_str("</div>");
    html
}

/// Point-in-time view of a widget's health, for logs and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetSummary {
    pub id: u64,
    pub title: String,
    pub content_available: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
}

/// A dashboard widget of any supported kind.
pub enum Widget {
    Clock(ClockWidget),
    Monitor(MonitorWidget),
    Feeds(FeedsWidget),
    PublicIp(PublicIpWidget),
}

impl Widget {
    /// Build a widget from its configuration, wiring in the shared
    /// providers it needs.
    pub fn from_config(config: WidgetConfig, providers: &Providers) -> Widget {
        match config {
            WidgetConfig::Clock(cfg) => Widget::Clock(ClockWidget::new(cfg)),
            WidgetConfig::Monitor(cfg) => Widget::Monitor(MonitorWidget::new(cfg, providers)),
            WidgetConfig::Feeds(cfg) => Widget::Feeds(FeedsWidget::new(cfg, providers)),
            WidgetConfig::PublicIp(cfg) => Widget::PublicIp(PublicIpWidget::new(cfg, providers)),
        }
    }

    /// One-time setup after construction: apply cache policies and
    /// precompute anything the refresh path should not repeat.
    pub async fn initialize(&mut self) -> Result<()> {
        match self {
            Widget::Clock(w) => w.initialize(),
            Widget::Monitor(w) => w.initialize().await,
            Widget::Feeds(w) => w.initialize(),
            Widget::PublicIp(w) => w.initialize(),
        }
    }

    pub fn state(&self) -> &WidgetState {
        match self {
            Widget::Clock(w) => &w.state,
            Widget::Monitor(w) => &w.state,
            Widget::Feeds(w) => &w.state,
            Widget::PublicIp(w) => &w.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut WidgetState {
        match self {
            Widget::Clock(w) => &mut w.state,
            Widget::Monitor(w) => &mut w.state,
            Widget::Feeds(w) => &mut w.state,
            Widget::PublicIp(w) => &mut w.state,
        }
    }

    pub fn requires_update(&self, now: DateTime<Utc>) -> bool {
        self.state().requires_update(now)
    }

    /// Run one refresh cycle. Failures are folded into the widget's state
    /// rather than propagated; a refresh can degrade a widget but never
    /// take the dashboard down.
    pub async fn update(&mut self) {
        match self {
            Widget::Clock(w) => w.update().await,
            Widget::Monitor(w) => w.update().await,
            Widget::Feeds(w) => w.update().await,
            Widget::PublicIp(w) => w.update().await,
        }
    }

    /// Produce the widget's display fragment from whatever state it has.
    /// This never fails: a broken renderer yields a placeholder instead.
    pub fn render(&mut self) -> String {
        let body = match self {
            Widget::Clock(w) => {
                let content = w.render_content();
                w.state.render_with(|| content)
            }
            Widget::Monitor(w) => {
                let content = w.render_content();
                w.state.render_with(|| content)
            }
            Widget::Feeds(w) => {
                let content = w.render_content();
                w.state.render_with(|| content)
            }
            Widget::PublicIp(w) => {
                let content = w.render_content();
                w.state.render_with(|| content)
            }
        };

        frame_fragment(self.state(), &body)
    }

    pub fn summary(&self) -> WidgetSummary {
        let state = self.state();
        WidgetSummary {
            id: state.id(),
            title: state.title().to_string(),
            content_available: state.content_available(),
            error: state.error().map(str::to_string),
            notice: state.notice().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 17, 42).unwrap()
    }

    fn state_with_cache(d: Duration) -> WidgetState {
        let mut state = WidgetState::new("test");
        state.set_cache_duration(d);
        state
    }

    #[test]
    fn test_infinite_cache_is_never_due() {
        let state = WidgetState::new("static");
        assert!(!state.requires_update(fixed_now()));
        assert!(!state.requires_update(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_unscheduled_widget_is_due() {
        let state = state_with_cache(Duration::from_secs(300));
        assert!(state.requires_update(fixed_now()));
    }

    #[test]
    fn test_due_only_strictly_after_deadline() {
        let now = fixed_now();
        let mut state = state_with_cache(Duration::from_secs(300));
        state.schedule_next_update(now);

        let deadline = now + chrono::Duration::seconds(300);
        assert!(!state.requires_update(now + chrono::Duration::seconds(299)));
        assert!(!state.requires_update(deadline));
        assert!(state.requires_update(deadline + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_due_check_is_idempotent() {
        let now = fixed_now();
        let mut state = state_with_cache(Duration::from_secs(60));
        state.schedule_next_update(now);

        let later = now + chrono::Duration::seconds(120);
        assert!(state.requires_update(later));
        assert!(state.requires_update(later));
        assert!(state.requires_update(later));
        assert_eq!(state.next_update(), Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_on_the_hour_scheduling() {
        let mut state = WidgetState::new("clock");
        state.set_cache_on_the_hour();

        state.schedule_next_update(fixed_now());
        assert_eq!(
            state.next_update(),
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap())
        );

        // Exactly on the hour schedules a full hour ahead.
        state.schedule_next_update(Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap());
        assert_eq!(
            state.next_update(),
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_backoff_grows_quadratically_and_caps() {
        let now = fixed_now();
        // Regular cadence far enough out that backoff always wins.
        let mut state = state_with_cache(Duration::from_secs(2 * 60 * 60));

        for expected_minutes in [1, 4, 9, 16, 25] {
            state.handle_update_result(now, Err(UpdateError::NoContent(None)));
            assert_eq!(
                state.next_update(),
                Some(now + chrono::Duration::minutes(expected_minutes))
            );
        }

        // A sixth failure stays at the cap.
        state.handle_update_result(now, Err(UpdateError::NoContent(None)));
        assert_eq!(state.next_update(), Some(now + chrono::Duration::minutes(25)));
    }

    #[test]
    fn test_backoff_never_later_than_regular_cadence() {
        let now = fixed_now();
        let mut state = state_with_cache(Duration::from_secs(30));

        // First retry would be a minute out, but the regular cadence is
        // only 30 seconds away.
        state.handle_update_result(now, Err(UpdateError::NoContent(None)));
        assert_eq!(state.next_update(), Some(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_success_clears_failure_state() {
        let now = fixed_now();
        let mut state = state_with_cache(Duration::from_secs(300));

        for _ in 0..3 {
            state.handle_update_result(now, Err(UpdateError::NoContent(None)));
        }
        assert!(!state.content_available());
        assert!(state.error().is_some());

        let keep = state.handle_update_result(now, Ok(()));
        assert!(keep);
        assert!(state.content_available());
        assert!(state.error().is_none());
        assert!(state.notice().is_none());
        assert_eq!(state.next_update(), Some(now + chrono::Duration::seconds(300)));

        // Retry counter was reset, so a new failure starts at one minute.
        state.handle_update_result(now, Err(UpdateError::NoContent(None)));
        assert_eq!(state.next_update(), Some(now + chrono::Duration::minutes(1)));
    }

    #[test]
    fn test_partial_failure_keeps_widget_available() {
        let now = fixed_now();
        let mut state = state_with_cache(Duration::from_secs(2 * 60 * 60));

        let keep = state.handle_update_result(
            now,
            Err(UpdateError::PartialContent { failed: 1, total: 4 }),
        );

        assert!(keep);
        assert!(state.content_available());
        assert!(state.error().is_none());
        let notice = state.notice().unwrap();
        assert!(notice.contains("missing 1 of 4"));
        // Partial failures still retry early.
        assert_eq!(state.next_update(), Some(now + chrono::Duration::minutes(1)));
    }

    #[test]
    fn test_total_failure_marks_unavailable() {
        let now = fixed_now();
        let mut state = state_with_cache(Duration::from_secs(300));

        let keep = state.handle_update_result(now, Err(UpdateError::NoContent(None)));

        assert!(!keep);
        assert!(!state.content_available());
        assert!(state.error().is_some());
        assert!(state.notice().is_none());
    }

    #[test]
    fn test_fanout_outcome_rule() {
        assert!(fanout_outcome(0, 5).is_ok());
        assert!(matches!(
            fanout_outcome(2, 5),
            Err(UpdateError::PartialContent { failed: 2, total: 5 })
        ));
        assert!(matches!(fanout_outcome(5, 5), Err(UpdateError::NoContent(None))));
        assert!(fanout_outcome(0, 0).is_ok());
    }

    #[test]
    fn test_render_failure_falls_back_to_placeholder() {
        let mut state = state_with_cache(Duration::from_secs(300));
        state.handle_update_result(fixed_now(), Ok(()));
        assert!(state.content_available());

        let html = state.render_with(|| Err(RenderError::Other("bad fragment".to_string())));

        assert_eq!(html, RENDER_ERROR_FRAGMENT);
        assert!(!state.content_available());
        assert!(state.error().unwrap().contains("bad fragment"));
    }

    #[test]
    fn test_custom_cache_overrides_source_default() {
        let mut with_override =
            WidgetState::new("a").with_custom_cache(Some(Duration::from_secs(120)));
        with_override.set_cache_duration(Duration::from_secs(300));
        assert_eq!(
            with_override.cache_policy,
            CachePolicy::Duration(Duration::from_secs(120))
        );

        let mut without_override = WidgetState::new("b");
        without_override.set_cache_duration(Duration::from_secs(300));
        assert_eq!(
            without_override.cache_policy,
            CachePolicy::Duration(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_widget_ids_are_unique() {
        let a = WidgetState::new("a");
        let b = WidgetState::new("b");
        let c = WidgetState::new("c");
        assert!(a.id() != b.id());
        assert!(b.id() != c.id());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"a" & 'b'</b>"#),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_frame_shows_error_banner() {
        let now = fixed_now();
        let mut state = state_with_cache(Duration::from_secs(300));
        state.handle_update_result(now, Err(UpdateError::NoContent(None)));

        let html = frame_fragment(&state, "<p>old content</p>");
        assert!(html.contains("widget-error"));
        assert!(html.contains("<p>old content</p>"));
    }

    #[test]
    fn test_frame_hides_header_when_asked() {
        let state = WidgetState::new("hidden").with_hide_header(true);
        let html = frame_fragment(&state, "");
        assert!(!html.contains("widget-header"));
        assert!(!html.contains("hidden"));
    }
}
