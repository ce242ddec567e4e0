//! Public IP address widget

use crate::config::PublicIpConfig;
use crate::dashboard::Providers;
use crate::errors::{RenderError, Result, UpdateError};
use crate::fetch::{HttpClients, fetch_json};
use crate::widget::{WidgetState, escape_html};
use chrono::Utc;
use serde::Deserialize;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const DEFAULT_LOOKUP_URL: &str = "https://ipinfo.io/json";
const DEFAULT_CACHE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Deserialize)]
struct LookupResponse {
    ip: String,
    #[serde(default)]
    country: Option<String>,
}

/// Shows the machine's public address as seen by a lookup service.
///
/// A failed lookup keeps the previously shown address on screen; the
/// shared frame marks the widget unavailable instead.
pub struct PublicIpWidget {
    pub(crate) state: WidgetState,
    lookup_url: Option<String>,
    public_ip: String,
    label: String,
    clients: Arc<HttpClients>,
}

impl PublicIpWidget {
    pub fn new(config: PublicIpConfig, providers: &Providers) -> Self {
        let state = WidgetState::new(config.common.title_or("IP Address"))
            .with_custom_cache(config.common.custom_cache())
            .with_hide_header(config.common.hide_header);

        // An explicitly empty URL disables the lookup.
        let lookup_url = match config.lookup_url {
            None => Some(DEFAULT_LOOKUP_URL.to_string()),
            Some(url) if url.is_empty() => None,
            Some(url) => Some(url),
        };

        Self {
            state,
            lookup_url,
            public_ip: String::new(),
            label: String::new(),
            clients: Arc::clone(&providers.clients),
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.state.set_cache_duration(DEFAULT_CACHE);
        Ok(())
    }

    pub async fn update(&mut self) {
        let Some(url) = self.lookup_url.clone() else {
            self.state.handle_update_result(Utc::now(), Ok(()));
            return;
        };

        match fetch_json::<LookupResponse>(self.clients.default.get(&url)).await {
            Ok(response) => {
                self.label = match response.country {
                    Some(country) if !country.is_empty() => format!("Public ({})", country),
                    _ => "Public".to_string(),
                };
                self.public_ip = response.ip;
                self.state.handle_update_result(Utc::now(), Ok(()));
            }
            Err(err) => {
                error!(url = %url, error = %err, "public ip lookup failed");
                self.state.handle_update_result(
                    Utc::now(),
                    Err(UpdateError::NoContent(Some(err.to_string()))),
                );
            }
        }
    }

    pub fn render_content(&self) -> std::result::Result<String, RenderError> {
        let mut html = String::new();
        write!(html, "<div class=\"widget-content ip-address\">")?;

        if self.public_ip.is_empty() {
            write!(html, "<span class=\"ip-value ip-unknown\">Unavailable</span>")?;
        } else {
            write!(
                html,
                "<span class=\"ip-label\">{}</span>",
                escape_html(&self.label)
            )?;
            write!(
                html,
                "<span class=\"ip-value\">{}</span>",
                escape_html(&self.public_ip)
            )?;
        }

        write!(html, "</div>")?;
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommonWidgetConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn widget_for(url: Option<String>) -> PublicIpWidget {
        let providers = Providers::new().unwrap();
        let mut widget = PublicIpWidget::new(
            PublicIpConfig {
                common: CommonWidgetConfig::default(),
                lookup_url: url,
            },
            &providers,
        );
        widget.initialize().unwrap();
        widget
    }

    #[tokio::test]
    async fn test_successful_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"ip":"203.0.113.9","country":"CA"}"#),
            )
            .mount(&server)
            .await;

        let mut widget = widget_for(Some(format!("{}/json", server.uri())));
        widget.update().await;

        assert_eq!(widget.public_ip, "203.0.113.9");
        assert_eq!(widget.label, "Public (CA)");
        assert!(widget.state.content_available());

        let html = widget.render_content().unwrap();
        assert!(html.contains("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_failed_lookup_without_prior_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut widget = widget_for(Some(format!("{}/json", server.uri())));
        widget.update().await;

        assert!(!widget.state.content_available());
        assert!(widget.state.error().is_some());
        assert!(widget.render_content().unwrap().contains("Unavailable"));
    }

    #[tokio::test]
    async fn test_failed_lookup_keeps_stale_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ip":"203.0.113.9"}"#))
            .mount(&server)
            .await;

        let mut widget = widget_for(Some(format!("{}/json", server.uri())));
        widget.update().await;
        assert_eq!(widget.label, "Public");
        assert!(widget.state.content_available());

        // Swap the endpoint to a failure; the next update produces nothing.
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        widget.update().await;

        assert!(!widget.state.content_available());
        // The old address is still shown under the error banner.
        assert!(widget.render_content().unwrap().contains("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_disabled_lookup_stays_quiet() {
        let mut widget = widget_for(Some(String::new()));
        widget.update().await;

        assert!(widget.state.content_available());
        assert!(widget.state.error().is_none());
        assert!(widget.public_ip.is_empty());
    }
}
