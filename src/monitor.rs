//! Site availability monitor widget
//!
//! Probes a list of sites concurrently, records each outcome in the shared
//! uptime history, and renders a status row per site. When the internet
//! itself is unreachable only local sites are probed, so a dead uplink
//! shows up as "unknown" rather than a wall of down sites.

use crate::config::{MonitorConfig, SiteConfig};
use crate::connectivity::{ConnectivityProbe, is_local_url};
use crate::dashboard::Providers;
use crate::errors::{FetchError, RenderError, Result, UpdateError};
use crate::fetch::HttpClients;
use crate::history::{ProbeOutcome, UptimeHistory};
use crate::widget::{WidgetState, escape_html};
use crate::worker;
use chrono::Utc;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

const DEFAULT_SITE_TIMEOUT: Duration = Duration::from_secs(7);
const DEFAULT_CACHE: Duration = Duration::from_secs(5 * 60);

/// Shorter cadence used while offline so recovery is noticed quickly.
const OFFLINE_CACHE: Duration = Duration::from_secs(60);

const MAX_PROBE_WORKERS: usize = 20;

/// Everything a probe task needs, cloned into the worker pool.
#[derive(Debug, Clone)]
pub struct SiteRequest {
    pub url: String,
    pub check_url: Option<String>,
    pub allow_insecure: bool,
    pub timeout: Duration,
    pub basic_auth: Option<(String, String)>,
}

impl SiteRequest {
    fn probe_url(&self) -> &str {
        self.check_url.as_deref().unwrap_or(&self.url)
    }
}

/// Result of probing a single site. A refused connection or timeout is
/// still a meaningful result, carried in `error`, not a task failure.
#[derive(Debug, Clone, Default)]
pub struct SiteStatus {
    pub code: u16,
    pub timed_out: bool,
    pub response_time: Duration,
    pub error: Option<String>,
}

pub(crate) async fn probe_site(
    clients: Arc<HttpClients>,
    request: SiteRequest,
) -> std::result::Result<SiteStatus, FetchError> {
    let client = if request.allow_insecure {
        &clients.monitor_insecure
    } else {
        &clients.monitor
    };

    let mut builder = client.get(request.probe_url()).timeout(request.timeout);
    if let Some((username, password)) = &request.basic_auth {
        builder = builder.basic_auth(username, Some(password));
    }

    let started = Instant::now();
    match builder.send().await {
        Ok(response) => Ok(SiteStatus {
            code: response.status().as_u16(),
            timed_out: false,
            response_time: started.elapsed(),
            error: None,
        }),
        Err(err) => Ok(SiteStatus {
            code: 0,
            timed_out: err.is_timeout(),
            response_time: started.elapsed(),
            error: Some(err.to_string()),
        }),
    }
}

fn site_is_up(status: &SiteStatus, alt_status_codes: &[u16]) -> bool {
    status.error.is_none() && (status.code == 200 || alt_status_codes.contains(&status.code))
}

fn status_text(status: &SiteStatus) -> String {
    if status.timed_out {
        return "Timeout".to_string();
    }
    if status.code == 0 {
        return if status.error.is_some() {
            "Connection Error".to_string()
        } else {
            "Unknown".to_string()
        };
    }
    if status.code == 200 {
        return "OK".to_string();
    }
    status.code.to_string()
}

fn status_style(status: &SiteStatus, alt_status_codes: &[u16]) -> &'static str {
    if status.error.is_some() || status.timed_out {
        return "error";
    }
    if status.code == 0 {
        return "unknown";
    }
    if status.code == 200 || alt_status_codes.contains(&status.code) || status.code < 400 {
        return "ok";
    }
    "error"
}

struct Site {
    title: String,
    request: SiteRequest,
    error_url: Option<String>,
    alt_status_codes: Vec<u16>,
    is_local: bool,

    status: Option<SiteStatus>,
    link_url: String,
    status_text: String,
    status_style: &'static str,
    history: Vec<ProbeOutcome>,
}

impl Site {
    fn from_config(config: SiteConfig) -> Self {
        let link_url = config.url.clone();
        Self {
            title: config.title,
            request: SiteRequest {
                url: config.url,
                check_url: config.check_url,
                allow_insecure: config.allow_insecure,
                timeout: config
                    .timeout_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_SITE_TIMEOUT),
                basic_auth: config
                    .basic_auth
                    .map(|auth| (auth.username, auth.password)),
            },
            error_url: config.error_url,
            alt_status_codes: config.alt_status_codes,
            is_local: false,
            status: None,
            link_url,
            status_text: String::new(),
            status_style: "unknown",
            history: Vec::new(),
        }
    }
}

pub struct MonitorWidget {
    pub(crate) state: WidgetState,
    sites: Vec<Site>,
    show_failing_only: bool,
    show_internet_status: bool,
    has_failing: bool,
    internet_up: bool,
    clients: Arc<HttpClients>,
    history: Arc<UptimeHistory>,
    connectivity: Arc<ConnectivityProbe>,
}

impl MonitorWidget {
    pub fn new(config: MonitorConfig, providers: &Providers) -> Self {
        let state = WidgetState::new(config.common.title_or("Monitor"))
            .with_custom_cache(config.common.custom_cache())
            .with_hide_header(config.common.hide_header);

        Self {
            state,
            sites: config.sites.into_iter().map(Site::from_config).collect(),
            show_failing_only: config.show_failing_only,
            show_internet_status: config.show_internet_status,
            has_failing: false,
            internet_up: true,
            clients: Arc::clone(&providers.clients),
            history: Arc::clone(&providers.history),
            connectivity: Arc::clone(&providers.connectivity),
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        self.state.set_cache_duration(DEFAULT_CACHE);

        for site in &mut self.sites {
            site.is_local = is_local_url(site.request.probe_url()).await;
        }

        Ok(())
    }

    pub async fn update(&mut self) {
        self.internet_up = self.connectivity.is_reachable().await;

        let mut checked = Vec::new();
        let mut requests = Vec::new();
        for (index, site) in self.sites.iter().enumerate() {
            if self.internet_up || site.is_local {
                checked.push(index);
                requests.push(site.request.clone());
            }
        }

        if !self.internet_up {
            warn!(
                widget = self.state.title(),
                skipped = self.sites.len() - checked.len(),
                "internet unreachable, probing local sites only"
            );
        }

        let total = requests.len();
        if total > 0 {
            let clients = Arc::clone(&self.clients);
            let outcome = worker::job(
                move |request| probe_site(Arc::clone(&clients), request),
                requests,
            )
            .with_workers(total.min(MAX_PROBE_WORKERS))
            .run()
            .await;

            let results = match outcome {
                Ok(results) => results,
                Err(err) => {
                    error!(
                        widget = self.state.title(),
                        error = %err,
                        "site probes failed to run"
                    );
                    self.state.handle_update_result(
                        Utc::now(),
                        Err(UpdateError::NoContent(Some(err.to_string()))),
                    );
                    return;
                }
            };

            for (slot, index) in checked.iter().copied().enumerate() {
                let status = match &results[slot] {
                    Ok(status) => status.clone(),
                    Err(err) => SiteStatus {
                        code: 0,
                        timed_out: err.is_timeout(),
                        response_time: Duration::ZERO,
                        error: Some(err.to_string()),
                    },
                };

                let site = &mut self.sites[index];
                let up = site_is_up(&status, &site.alt_status_codes);
                self.history.record(
                    &site.request.url,
                    if up { ProbeOutcome::Up } else { ProbeOutcome::Down },
                );
                site.history = self.history.get(&site.request.url);

                site.link_url = match (&status.error, &site.error_url) {
                    (Some(_), Some(error_url)) => error_url.clone(),
                    _ => site.request.url.clone(),
                };
                site.status_text = status_text(&status);
                site.status_style = status_style(&status, &site.alt_status_codes);
                site.status = Some(status);
            }
        }

        // Sites skipped while offline show as unknown rather than down.
        for (index, site) in self.sites.iter_mut().enumerate() {
            if checked.contains(&index) {
                continue;
            }
            self.history.record(&site.request.url, ProbeOutcome::Unknown);
            site.history = self.history.get(&site.request.url);
            site.link_url = site.request.url.clone();
            site.status_text = "Unknown".to_string();
            site.status_style = "unknown";
            site.status = Some(SiteStatus::default());
        }

        self.has_failing = self.sites.iter().any(|site| site.status_style == "error");

        if self.internet_up {
            self.state.set_cache_duration(DEFAULT_CACHE);
        } else {
            self.state.set_cache_duration(OFFLINE_CACHE);
        }

        self.state.handle_update_result(Utc::now(), Ok(()));
    }

    pub fn render_content(&self) -> std::result::Result<String, RenderError> {
        let mut html = String::new();
        write!(html, "<div class=\"widget-content monitor\">")?;

        if self.show_internet_status {
            let (style, text) = if self.internet_up {
                ("ok", "Connected")
            } else {
                ("error", "Offline")
            };
            write!(
                html,
                "<div class=\"monitor-site internet-status\"><span class=\"site-title\">Internet</span><span class=\"site-status status-{}\">{}</span></div>",
                style, text
            )?;
        }

        if self.show_failing_only && !self.has_failing {
            write!(html, "<div class=\"monitor-all-ok\">All sites are up.</div>")?;
        } else {
            for site in &self.sites {
                if self.show_failing_only && site.status_style != "error" {
                    continue;
                }

                write!(html, "<div class=\"monitor-site\">")?;
                write!(
                    html,
                    "<a class=\"site-title\" href=\"{}\">{}</a>",
                    escape_html(&site.link_url),
                    escape_html(&site.title)
                )?;

                match &site.status {
                    Some(status) => write!(
                        html,
                        "<span class=\"site-status status-{}\" title=\"{}ms\">{}</span>",
                        site.status_style,
                        status.response_time.as_millis(),
                        escape_html(&site.status_text)
                    )?,
                    None => write!(
                        html,
                        "<span class=\"site-status status-unknown\">Pending</span>"
                    )?,
                }

                write!(html, "<span class=\"site-history\">")?;
                for outcome in &site.history {
                    write!(
                        html,
                        "<span class=\"history-dot dot-{}\"></span>",
                        outcome.css_class()
                    )?;
                }
                write!(html, "</span></div>")?;
            }
        }

        write!(html, "</div>")?;
        Ok(html)
    }
}
