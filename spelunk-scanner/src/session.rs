use crate::driver::Browser;
use crate::endpoint::{Endpoint, EndpointSet};
use crate::error::{Result, ScanError};
use crate::explorer::{ExploreOptions, Explorer, TraversalSummary};
use crate::login::{Credentials, LoginOptions, login};
use crate::recorder::EndpointRecorder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything a finished (or timed out) scan produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub target: String,
    pub endpoints: Vec<Endpoint>,
    pub summary: TraversalSummary,
    pub logged_in: bool,
    pub elapsed: Duration,
}

/// One scan of one site over an already connected browser.
pub struct Session<B: Browser> {
    browser: Arc<B>,
    explore_options: ExploreOptions,
    login_options: LoginOptions,
    intercept_pattern: String,
    cancel: CancellationToken,
}

impl<B: Browser> Session<B> {
    pub fn new(browser: Arc<B>) -> Self {
        Self {
            browser,
            explore_options: ExploreOptions::default(),
            login_options: LoginOptions::default(),
            intercept_pattern: "*".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_explorer(mut self, options: ExploreOptions) -> Self {
        self.explore_options = options;
        self
    }

    pub fn with_login_options(mut self, options: LoginOptions) -> Self {
        self.login_options = options;
        self
    }

    pub fn with_intercept_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.intercept_pattern = pattern.into();
        self
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C.
    /// Each run works on a child of it.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Log in (when credentials are given), explore from `url` and return the
    /// endpoints observed. Hitting `budget` stops exploration early but still
    /// yields a valid, partial outcome.
    pub async fn run(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        budget: Option<Duration>,
    ) -> Result<ScanOutcome> {
        let started = Instant::now();
        let cancel = self.cancel.child_token();
        let endpoints = EndpointSet::new();
        let recorder = EndpointRecorder::start(
            self.browser.as_ref(),
            &self.intercept_pattern,
            endpoints,
        )
        .await?;

        let deadline = budget.map(|budget| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                info!("Scan budget of {:?} exhausted, stopping", budget);
                cancel.cancel();
            })
        });

        let explored = self.login_and_explore(url, credentials, cancel.clone()).await;

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        let endpoints = recorder.finish().await;

        match explored {
            Ok((logged_in, summary)) => Ok(ScanOutcome {
                target: url.to_string(),
                endpoints,
                summary,
                logged_in,
                elapsed: started.elapsed(),
            }),
            Err(e) if e.is_fatal() => Err(ScanError::Aborted {
                source: Box::new(e),
                endpoints,
            }),
            Err(e) => {
                warn!("Exploration stopped early: {}", e);
                Ok(ScanOutcome {
                    target: url.to_string(),
                    endpoints,
                    summary: TraversalSummary {
                        cancelled: cancel.is_cancelled(),
                        ..TraversalSummary::default()
                    },
                    logged_in: false,
                    elapsed: started.elapsed(),
                })
            }
        }
    }

    async fn login_and_explore(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        cancel: CancellationToken,
    ) -> Result<(bool, TraversalSummary)> {
        let root = self
            .browser
            .open_page(url)
            .await
            .map_err(|e| ScanError::FatalConnection(format!("could not open {}: {}", url, e)))?;

        let logged_in = match credentials {
            Some(credentials) => login(&root, credentials, &self.login_options).await,
            None => false,
        };

        let explorer = Explorer::new(self.browser.clone(), self.explore_options.clone());
        let summary = explorer.explore(root, url, cancel).await?;
        Ok((logged_in, summary))
    }
}
