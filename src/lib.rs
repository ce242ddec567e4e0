//! Dashboard refresh-and-cache engine
//!
//! This library provides the refresh machinery behind a self-hosted
//! dashboard: widgets that fetch remote content on their own schedules,
//! cache it, degrade gracefully when sources fail, and render HTML
//! fragments from whatever state they have.

pub mod config;
pub mod errors;
pub mod fetch;
pub mod worker;
pub mod history;
pub mod connectivity;
pub mod widget;
pub mod clock;
pub mod monitor;
pub mod feeds;
pub mod ip_address;
pub mod page;
pub mod dashboard;

pub use config::Config;
pub use dashboard::{Dashboard, Providers};
pub use errors::{DashboardError, FetchError, RenderError, Result, UpdateError};
pub use page::Page;
pub use widget::{CachePolicy, Widget, WidgetState, WidgetSummary};
