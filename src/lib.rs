pub mod config;
pub mod errors;
pub mod filter;
pub mod logging;
pub mod models;
pub mod tracker;

use crate::config::Settings;
use crate::errors::AppResult;
use crate::filter::{FilterConfig, FilterEngine, Record};
use crate::tracker::{HttpTransport, ViewReporter, ViewTracker};
use std::sync::Arc;

pub use crate::errors::AppError;
pub use crate::models::{FlushReport, QueryState, ViewBatch, ViewItem};

/// Application-wide handles, built once at startup and passed to page components.
#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    reporter: ViewReporter,
}

impl AppState {
    /// Must be called from inside a tokio runtime.
    pub fn new(settings: Settings) -> AppResult<Self> {
        settings.validate()?;
        let transport = HttpTransport::new(&settings.reporter)?;
        tracing::info!(
            url = %transport.url(),
            interval_ms = settings.reporter.interval_ms,
            "view reporter ready"
        );
        let reporter = ViewReporter::new(Arc::new(transport), &settings.reporter)?;
        Ok(Self {
            settings: Arc::new(settings),
            reporter,
        })
    }

    pub fn with_reporter(settings: Settings, reporter: ViewReporter) -> Self {
        Self {
            settings: Arc::new(settings),
            reporter,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn reporter(&self) -> &ViewReporter {
        &self.reporter
    }

    pub fn filter_engine<T, I, S>(&self, items: Vec<T>, search_fields: I) -> FilterEngine<T>
    where
        T: Record,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterEngine::new(
            items,
            FilterConfig::new(search_fields, self.settings.filter.items_per_page),
        )
    }

    pub fn tracker(&self, path: impl Into<String>) -> ViewTracker {
        ViewTracker::new(self.reporter.clone(), path)
    }

    pub fn auto_tracker(
        &self,
        kind: impl Into<String>,
        id: i64,
        path: impl Into<String>,
    ) -> ViewTracker {
        ViewTracker::auto(self.reporter.clone(), kind, id, path)
    }

    /// Reports whatever is still queued, e.g. before the process exits.
    pub async fn shutdown(&self) -> FlushReport {
        self.reporter.flush_now().await
    }
}
