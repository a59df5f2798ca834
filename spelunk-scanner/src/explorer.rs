use crate::classifier::{find_clickable, normalize_label};
use crate::driver::{Browser, Element, Page};
use crate::error::{Result, ScanError};
use crate::frontier::{Claim, Frontier};
use crate::location::Location;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExploreProgress {
    pub worker_id: usize,
    pub label: String,
    pub processed: usize,
    pub claimed: usize,
}

impl ExploreProgress {
    pub fn percent(&self) -> f64 {
        progress_percent(self.processed, self.claimed)
    }
}

pub type ProgressCallback = Arc<dyn Fn(ExploreProgress) + Send + Sync>;

/// Share of claimed locations already processed, rounded to two decimals.
pub fn progress_percent(processed: usize, claimed: usize) -> f64 {
    if claimed == 0 {
        return 100.0;
    }
    (processed as f64 * 10000.0 / claimed as f64).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalSummary {
    pub seeded: usize,
    pub claimed: usize,
    pub processed: usize,
    pub failed: usize,
    pub over_budget: usize,
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct ExploreOptions {
    pub workers: usize,
    pub max_depth: usize,
    pub max_locations: usize,
    pub hop_timeout: Duration,
    pub settle_timeout: Duration,
    pub poll_interval: Duration,
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExploreOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            max_depth: 8,
            max_locations: 1000,
            hop_timeout: Duration::from_secs(5),
            settle_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            progress_callback: None,
        }
    }
}

impl ExploreOptions {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn with_max_locations(mut self, max_locations: usize) -> Self {
        self.max_locations = max_locations;
        self
    }

    pub fn with_hop_timeout(mut self, timeout: Duration) -> Self {
        self.hop_timeout = timeout;
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }
}

impl std::fmt::Debug for ExploreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExploreOptions")
            .field("workers", &self.workers)
            .field("max_depth", &self.max_depth)
            .field("max_locations", &self.max_locations)
            .field("hop_timeout", &self.hop_timeout)
            .field("settle_timeout", &self.settle_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    over_budget: AtomicUsize,
    budget_warned: AtomicBool,
}

/// Explores a web UI by replaying click paths in fresh pages.
pub struct Explorer<B: Browser> {
    browser: Arc<B>,
    options: ExploreOptions,
}

impl<B: Browser> Explorer<B> {
    pub fn new(browser: Arc<B>, options: ExploreOptions) -> Self {
        Self { browser, options }
    }

    pub fn options(&self) -> &ExploreOptions {
        &self.options
    }

    /// Seed from `root`, close it, then explore until every claimed location
    /// is processed or `cancel` fires.
    pub async fn explore(
        &self,
        root: B::Page,
        start_url: &str,
        cancel: CancellationToken,
    ) -> Result<TraversalSummary> {
        let workers = self.options.workers.max(1);
        info!("Starting exploration of {} with {} workers", start_url, workers);

        let frontier = Arc::new(Frontier::new(self.options.max_locations));
        let counters = Arc::new(Counters::default());

        let seeded = seed(&root, &frontier, &counters).await;
        if let Err(e) = root.close().await {
            debug!("Failed to close root page: {}", e);
        }
        let seeded = seeded?;
        info!("Seeded {} locations from {}", seeded, start_url);

        // stopped by the caller or by a dead worker
        let stop = cancel.child_token();
        let mut worker_handles = Vec::new();
        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                browser: self.browser.clone(),
                frontier: frontier.clone(),
                counters: counters.clone(),
                options: self.options.clone(),
                start_url: start_url.to_string(),
                cancel: stop.clone(),
            };
            worker_handles.push(tokio::spawn(worker.run()));
        }

        let mut worker_error = None;
        for handle in worker_handles {
            if let Err(e) = handle.await {
                warn!("Worker died: {}", e);
                stop.cancel();
                worker_error.get_or_insert(e);
            }
        }
        if let Some(e) = worker_error {
            frontier.drain().await;
            return Err(e.into());
        }

        let abandoned = frontier.drain().await;
        if abandoned > 0 {
            info!("Abandoned {} queued locations", abandoned);
        }

        let summary = TraversalSummary {
            seeded,
            claimed: frontier.claimed().await,
            processed: counters.processed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            over_budget: counters.over_budget.load(Ordering::SeqCst),
            cancelled: cancel.is_cancelled(),
        };
        info!(
            "Exploration {}. Processed {} of {} locations ({} failed)",
            if summary.cancelled { "cancelled" } else { "complete" },
            summary.processed,
            summary.claimed,
            summary.failed
        );
        Ok(summary)
    }
}

async fn seed<P: Page>(root: &P, frontier: &Frontier, counters: &Counters) -> Result<usize> {
    let path = root.current_url().await?;
    let mut seeded = 0;
    for clickable in find_clickable(root).await? {
        let location = Location::root(clickable.locator, clickable.text, path.clone());
        if offer(frontier, counters, location).await {
            seeded += 1;
        }
    }
    Ok(seeded)
}

async fn offer(frontier: &Frontier, counters: &Counters, location: Location) -> bool {
    match frontier.offer(location).await {
        Claim::Claimed => true,
        Claim::Duplicate => false,
        Claim::OverBudget => {
            counters.over_budget.fetch_add(1, Ordering::Relaxed);
            if !counters.budget_warned.swap(true, Ordering::Relaxed) {
                warn!("Location budget exhausted, further discoveries are discarded");
            }
            false
        }
    }
}

struct Worker<B: Browser> {
    id: usize,
    browser: Arc<B>,
    frontier: Arc<Frontier>,
    counters: Arc<Counters>,
    options: ExploreOptions,
    start_url: String,
    cancel: CancellationToken,
}

impl<B: Browser> Worker<B> {
    async fn run(self) {
        debug!("Worker {} started", self.id);
        loop {
            let location = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.frontier.next() => match next {
                    Some(location) => location,
                    None => break,
                },
            };

            let _done = self.frontier.guard();

            let label = format!("{}: {}", location.path, location_label(&location));
            info!("Exploring {}", label);
            self.report_progress(label).await;

            match self.process(&location).await {
                Ok(children) => {
                    self.counters.processed.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        "[Worker {}] {} new locations from {}",
                        self.id,
                        children,
                        location.key()
                    );
                }
                Err(ScanError::Cancelled) => {
                    debug!(
                        "[Worker {}] Abandoned {} on cancellation",
                        self.id,
                        location.key()
                    );
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    warn!("Abandoning {}: {}", location.key(), e);
                }
            }
        }
        debug!("Worker {} finished", self.id);
    }

    async fn report_progress(&self, label: String) {
        if let Some(ref callback) = self.options.progress_callback {
            callback(ExploreProgress {
                worker_id: self.id,
                label,
                processed: self.counters.processed.load(Ordering::SeqCst),
                claimed: self.frontier.claimed().await,
            });
        }
    }

    /// One unit of work in its own page; the page is closed whatever happens.
    async fn process(&self, location: &Location) -> Result<usize> {
        let page = self.browser.open_page(&self.start_url).await?;
        let result = AssertUnwindSafe(self.replay_and_discover(&page, location))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ScanError::WorkerPanicked(panic_message(panic.as_ref())))
            });
        if let Err(e) = page.close().await {
            debug!("[Worker {}] Failed to close page: {}", self.id, e);
        }
        result
    }

    async fn replay_and_discover(&self, page: &B::Page, location: &Location) -> Result<usize> {
        page.navigate(&location.path).await?;

        for hop in &location.hops {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let element = self
                .wait_for_element(page, hop)
                .await?
                .ok_or_else(|| ScanError::StaleLocator(hop.clone()))?;
            element.hover().await.map_err(|e| click_failed(hop, e))?;
            element.click().await.map_err(|e| click_failed(hop, e))?;
        }

        self.settle(page).await?;
        let current_path = page.current_url().await?;

        if location.depth() >= self.options.max_depth {
            debug!("{} is at the depth limit", location.key());
            return Ok(0);
        }

        let mut claimed = 0;
        for clickable in find_clickable(page).await? {
            if location.visits(&clickable.locator) {
                debug!("Skipping {}, already on this click path", clickable.label);
                continue;
            }
            let child = location.child(clickable.locator, clickable.text, current_path.clone());
            if offer(&self.frontier, &self.counters, child).await {
                claimed += 1;
            }
        }
        Ok(claimed)
    }

    async fn wait_for_element(
        &self,
        page: &B::Page,
        locator: &str,
    ) -> Result<Option<<B::Page as Page>::Element>> {
        let deadline = Instant::now() + self.options.hop_timeout;
        loop {
            if let Some(element) = page.find(locator).await? {
                return Ok(Some(element));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.pause().await?;
        }
    }

    /// Wait until the element count stops changing between two samples.
    async fn settle(&self, page: &B::Page) -> Result<()> {
        let deadline = Instant::now() + self.options.settle_timeout;
        let mut last = page.query_all("*").await?.len();
        loop {
            if Instant::now() >= deadline {
                return Ok(());
            }
            self.pause().await?;
            let current = page.query_all("*").await?.len();
            if current == last {
                return Ok(());
            }
            last = current;
        }
    }

    async fn pause(&self) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
            _ = tokio::time::sleep(self.options.poll_interval) => Ok(()),
        }
    }
}

/// Collapsed label text, or the last locator when the element has no text.
fn location_label(location: &Location) -> String {
    let text = normalize_label(&location.text);
    if !text.is_empty() {
        return text;
    }
    location.hops.last().cloned().unwrap_or_default()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn click_failed(locator: &str, err: ScanError) -> ScanError {
    ScanError::ClickFailed {
        locator: locator.to_string(),
        reason: err.to_string(),
    }
}
