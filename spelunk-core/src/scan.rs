use indicatif::{ProgressBar, ProgressStyle};
use spelunk_scanner::chrome::{ChromeBrowser, ChromeOptions};
use spelunk_scanner::explorer::{ExploreOptions, ExploreProgress, ProgressCallback};
use spelunk_scanner::login::{Credentials, LoginOptions};
use spelunk_scanner::session::{ScanOutcome, Session};
use spelunk_scanner::{Result, ScanError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

/// Options for configuring a scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub url: String,
    pub credentials: Option<Credentials>,
    pub threads: usize,
    pub max_depth: usize,
    /// Overall time budget; `None` runs until the UI is exhausted.
    pub timeout: Option<Duration>,
    pub browser: ChromeOptions,
    pub show_progress_bars: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            credentials: None,
            threads: 5,
            max_depth: 8,
            timeout: None,
            browser: ChromeOptions::default(),
            show_progress_bars: true,
        }
    }
}

impl ScanOptions {
    pub fn explore_options(&self) -> ExploreOptions {
        ExploreOptions::default()
            .with_workers(self.threads)
            .with_max_depth(self.max_depth)
    }
}

/// Callback for reporting scan milestones to the front end
pub type ScanProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Seconds from the command line to a budget. Zero means unlimited.
pub fn budget_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Only http(s) targets can be explored.
pub fn validate_target(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ScanError::InvalidUrl(format!(
            "{}: unsupported scheme '{}'",
            url, scheme
        ))),
    }
}

/// One spinner line per explored location.
pub fn format_progress(progress: &ExploreProgress) -> String {
    format!(
        "[{:>6.2}%] {} of {} locations | {}",
        progress.percent(),
        progress.processed,
        progress.claimed,
        progress.label
    )
}

/// Execute a scan with the given options and return what it captured.
pub async fn execute_scan(
    options: ScanOptions,
    progress_callback: Option<ScanProgressCallback>,
    cancel: CancellationToken,
) -> Result<ScanOutcome> {
    let target = validate_target(&options.url)?;
    info!(
        "Scanning {} with {} workers, max depth {}",
        target, options.threads, options.max_depth
    );

    let progress_bar = if options.show_progress_bars {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Starting browser...");
        Some(Arc::new(pb))
    } else {
        None
    };

    let mut explore_options = options.explore_options();
    if let Some(ref pb) = progress_bar {
        let pb = pb.clone();
        let callback: ProgressCallback = Arc::new(move |progress: ExploreProgress| {
            pb.set_message(format_progress(&progress));
        });
        explore_options = explore_options.with_progress_callback(callback);
    }

    if let Some(ref callback) = progress_callback {
        callback(match options.browser.endpoint {
            Some(ref endpoint) => format!("Connecting to browser at {}", endpoint),
            None => "Launching local browser".to_string(),
        });
    }
    let browser = match ChromeBrowser::start(&options.browser).await {
        Ok(browser) => Arc::new(browser),
        Err(e) => {
            if let Some(ref pb) = progress_bar {
                pb.finish_and_clear();
            }
            return Err(e);
        }
    };

    if let Some(ref pb) = progress_bar {
        pb.set_message(match options.credentials {
            Some(_) => format!("Logging in to {}...", target),
            None => format!("Opening {}...", target),
        });
    }

    let result = Session::new(browser)
        .with_explorer(explore_options)
        .with_login_options(LoginOptions::default())
        .with_cancellation(cancel)
        .run(target.as_str(), options.credentials.as_ref(), options.timeout)
        .await;

    if let Some(ref pb) = progress_bar {
        match result {
            Ok(ref outcome) => pb.finish_with_message(format!(
                "Scan complete! {} endpoints captured from {} locations",
                outcome.endpoints.len(),
                outcome.summary.processed
            )),
            Err(_) => pb.finish_and_clear(),
        }
    }

    if let (Some(callback), Ok(outcome)) = (progress_callback.as_ref(), result.as_ref()) {
        if outcome.summary.cancelled {
            callback("Scan stopped before the UI was exhausted; results are partial".to_string());
        }
        if options.credentials.is_some() && !outcome.logged_in {
            callback("No login form found, explored unauthenticated".to_string());
        }
    }

    result
}
