//! Clock widget

use crate::config::{ClockConfig, HourFormat};
use crate::errors::{RenderError, Result};
use crate::widget::{WidgetState, escape_html};
use chrono::{Local, Utc};
use std::fmt::Write;

/// Shows the current local time and date, re-rendered at the top of
/// every hour.
pub struct ClockWidget {
    pub(crate) state: WidgetState,
    hour_format: HourFormat,
    time_label: String,
    date_label: String,
}

impl ClockWidget {
    pub fn new(config: ClockConfig) -> Self {
        let state = WidgetState::new(config.common.title_or("Clock"))
            .with_custom_cache(config.common.custom_cache())
            .with_hide_header(config.common.hide_header);

        Self {
            state,
            hour_format: config.hour_format,
            time_label: String::new(),
            date_label: String::new(),
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.state.set_cache_on_the_hour();
        Ok(())
    }

    pub async fn update(&mut self) {
        let now = Local::now();

        self.time_label = match self.hour_format {
            HourFormat::TwentyFourHour => now.format("%H:%M").to_string(),
            HourFormat::TwelveHour => now.format("%I:%M %p").to_string(),
        };
        self.date_label = now.format("%A, %B %-d").to_string();

        self.state.handle_update_result(Utc::now(), Ok(()));
    }

    pub fn render_content(&self) -> std::result::Result<String, RenderError> {
        let mut html = String::new();
        write!(html, "<div class=\"widget-content clock\">")?;
        write!(
            html,
            "<span class=\"clock-time\">{}</span>",
            escape_html(&self.time_label)
        )?;
        write!(
            html,
            "<span class=\"clock-date\">{}</span>",
            escape_html(&self.date_label)
        )?;
        write!(html, "</div>")?;
        Ok(html)
    }
}
