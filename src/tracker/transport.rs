use crate::config::ReporterSettings;
use crate::errors::{AppError, AppResult};
use crate::models::ViewBatch;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = AppResult<()>> + Send + 'a>>;
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

pub trait ViewTransport: Send + Sync {
    fn send<'a>(&'a self, batch: &'a ViewBatch) -> TransportFuture<'a>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    token: Option<TokenProvider>,
}

impl HttpTransport {
    pub fn new(settings: &ReporterSettings) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self {
            client,
            url: settings.report_url(),
            token: settings.auth_token_file.clone().map(file_token_provider),
        })
    }

    pub fn with_token_provider(mut self, provider: TokenProvider) -> Self {
        self.token = Some(provider);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ViewTransport for HttpTransport {
    fn send<'a>(&'a self, batch: &'a ViewBatch) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut request = self.client.post(&self.url).json(batch);
            if let Some(token) = self.token.as_ref().and_then(|provider| provider()) {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AppError::Transport(format!(
                    "view report to {} rejected with status {status}",
                    self.url
                )));
            }
            Ok(())
        })
    }
}

/// Reads the persisted auth token on every call; a missing or blank file yields no token.
pub fn file_token_provider(path: PathBuf) -> TokenProvider {
    Arc::new(move || match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let token = contents.trim();
            (!token.is_empty()).then(|| token.to_string())
        }
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    error = %error,
                    path = %path.display(),
                    "failed to read auth token file"
                );
            }
            None
        }
    })
}
