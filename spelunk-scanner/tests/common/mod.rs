// In-memory browser used by the integration tests.
//
// A site is a set of screens. Entry screens are keyed by their URL, so
// `open_page`/`navigate` can find them; other screens (revealed menus,
// dialogs) keep the URL of the page they live on and are only reachable by
// clicking.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use spelunk_scanner::driver::{
    Browser, Element, Exchange, ExchangeReceiver, ExchangeSender, InterceptedRequest,
    InterceptedResponse, Page, Rect,
};
use spelunk_scanner::endpoint::Headers;
use spelunk_scanner::error::{Result, ScanError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct FakeRequest {
    pub method: String,
    pub url: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub enum Action {
    Nothing,
    Goto(String),
    /// Only moves on once something was typed into `field` on this page.
    GotoWhenFilled { field: String, screen: String },
    /// A driver bug surfacing as a panic inside a click.
    Panic(String),
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub locator: String,
    pub class_name: String,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub rect: Option<Rect>,
    pub pointer: bool,
    pub onclick: bool,
    pub action: Action,
    pub on_click: Vec<FakeRequest>,
    pub root_only: bool,
}

impl FakeNode {
    pub fn new(class_name: &str, locator: &str, text: &str) -> Self {
        Self {
            locator: locator.to_string(),
            class_name: class_name.to_string(),
            text: text.to_string(),
            attrs: HashMap::new(),
            rect: None,
            pointer: false,
            onclick: false,
            action: Action::Nothing,
            on_click: Vec::new(),
            root_only: false,
        }
    }

    pub fn goto(mut self, screen: &str) -> Self {
        self.action = Action::Goto(screen.to_string());
        self
    }

    pub fn goto_when_filled(mut self, field: &str, screen: &str) -> Self {
        self.action = Action::GotoWhenFilled {
            field: field.to_string(),
            screen: screen.to_string(),
        };
        self
    }

    pub fn panics(mut self, message: &str) -> Self {
        self.action = Action::Panic(message.to_string());
        self
    }

    pub fn calls(mut self, method: &str, url: &str, body: &str) -> Self {
        self.on_click.push(request(method, url, body));
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn with_pointer(mut self) -> Self {
        self.pointer = true;
        self
    }

    pub fn with_onclick(mut self) -> Self {
        self.onclick = true;
        self
    }

    /// Present on the first page ever opened only, stale everywhere else.
    pub fn root_only(mut self) -> Self {
        self.root_only = true;
        self
    }
}

pub fn button(locator: &str, text: &str) -> FakeNode {
    FakeNode::new("HTMLButtonElement", locator, text)
}

pub fn link(locator: &str, text: &str) -> FakeNode {
    FakeNode::new("HTMLAnchorElement", locator, text)
}

pub fn div(locator: &str, text: &str) -> FakeNode {
    FakeNode::new("HTMLDivElement", locator, text)
}

pub fn input(locator: &str, input_type: &str) -> FakeNode {
    FakeNode::new("HTMLInputElement", locator, "").attr("type", input_type)
}

pub fn submit(locator: &str) -> FakeNode {
    button(locator, "Submit").attr("type", "submit")
}

pub fn request(method: &str, url: &str, body: &str) -> FakeRequest {
    FakeRequest {
        method: method.to_string(),
        url: url.to_string(),
        body: body.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Screen {
    pub url: String,
    pub nodes: Vec<FakeNode>,
    pub requests: Vec<FakeRequest>,
}

impl Screen {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            nodes: Vec::new(),
            requests: Vec::new(),
        }
    }

    /// Nodes without an explicit rectangle are stacked vertically.
    pub fn node(mut self, mut node: FakeNode) -> Self {
        if node.rect.is_none() {
            let top = self.nodes.len() as f64 * 50.0;
            node.rect = Some(Rect::new(0.0, top, 100.0, top + 40.0));
        }
        self.nodes.push(node);
        self
    }

    pub fn loads(mut self, method: &str, url: &str, body: &str) -> Self {
        self.requests.push(request(method, url, body));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeSite {
    pub screens: HashMap<String, Screen>,
    pub failing: HashSet<String>,
    pub open_delay: Duration,
    pub unreachable: bool,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry screen under its own URL.
    pub fn page(self, screen: Screen) -> Self {
        let id = screen.url.clone();
        self.screen(&id, screen)
    }

    pub fn screen(mut self, id: &str, screen: Screen) -> Self {
        self.screens.insert(id.to_string(), screen);
        self
    }

    /// Exchanges for `url` fail to complete.
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
    pub opened: AtomicUsize,
    pub emitted: AtomicUsize,
    pub forwarded: AtomicUsize,
}

pub struct FakeBrowser {
    site: Arc<FakeSite>,
    interceptor: Mutex<Option<ExchangeSender>>,
    stats: Arc<Stats>,
    logs: Mutex<Vec<Arc<Mutex<Vec<String>>>>>,
}

impl FakeBrowser {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            interceptor: Mutex::new(None),
            stats: Arc::new(Stats::default()),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn max_open(&self) -> usize {
        self.stats.max_open.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn emitted(&self) -> usize {
        self.stats.emitted.load(Ordering::SeqCst)
    }

    pub fn forwarded(&self) -> usize {
        self.stats.forwarded.load(Ordering::SeqCst)
    }

    /// Actions performed on every page, in page-open order.
    pub fn page_logs(&self) -> Vec<Vec<String>> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .map(|log| log.lock().unwrap().clone())
            .collect()
    }

    /// Click sequences of every page that clicked anything.
    pub fn click_paths(&self) -> Vec<Vec<String>> {
        self.page_logs()
            .into_iter()
            .map(|log| {
                log.into_iter()
                    .filter_map(|entry| entry.strip_prefix("click ").map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .filter(|clicks| !clicks.is_empty())
            .collect()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    type Page = FakePage;

    async fn open_page(&self, url: &str) -> Result<FakePage> {
        if self.site.unreachable {
            return Err(ScanError::Driver("connection refused".to_string()));
        }
        if !self.site.open_delay.is_zero() {
            tokio::time::sleep(self.site.open_delay).await;
        }

        let id = self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(open, Ordering::SeqCst);

        let log = Arc::new(Mutex::new(Vec::new()));
        self.logs.lock().unwrap().push(log.clone());

        let state = Arc::new(PageState {
            id,
            site: self.site.clone(),
            screen: Mutex::new(String::new()),
            inputs: Mutex::new(Vec::new()),
            log,
            sender: self.interceptor.lock().unwrap().clone(),
            stats: self.stats.clone(),
        });
        let page = FakePage { state };
        page.state.record(format!("open {}", url));
        page.state.enter(url)?;
        Ok(page)
    }

    async fn intercept_requests(&self, _pattern: &str) -> Result<ExchangeReceiver> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.interceptor.lock().unwrap() = Some(sender);
        Ok(receiver)
    }
}

pub struct PageState {
    id: usize,
    site: Arc<FakeSite>,
    screen: Mutex<String>,
    inputs: Mutex<Vec<(String, String)>>,
    log: Arc<Mutex<Vec<String>>>,
    sender: Option<ExchangeSender>,
    stats: Arc<Stats>,
}

impl PageState {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn enter(&self, screen_id: &str) -> Result<()> {
        let screen = self
            .site
            .screens
            .get(screen_id)
            .ok_or_else(|| ScanError::Driver(format!("no such screen: {}", screen_id)))?;
        *self.screen.lock().unwrap() = screen_id.to_string();
        for request in &screen.requests {
            self.emit(request);
        }
        Ok(())
    }

    fn emit(&self, request: &FakeRequest) {
        self.stats.emitted.fetch_add(1, Ordering::SeqCst);
        if let Some(ref sender) = self.sender {
            let exchange = FakeExchange {
                request: InterceptedRequest {
                    url: request.url.clone(),
                    method: request.method.clone(),
                    headers: Headers::new(),
                    body: request.body.clone(),
                },
                fail: self.site.failing.contains(&request.url),
                stats: self.stats.clone(),
            };
            let _ = sender.send(Box::new(exchange));
        }
    }

    fn current(&self) -> Screen {
        let id = self.screen.lock().unwrap().clone();
        self.site.screens.get(&id).cloned().unwrap_or_else(|| Screen::new(""))
    }

    fn visible_nodes(&self) -> Vec<FakeNode> {
        self.current()
            .nodes
            .into_iter()
            .filter(|node| !node.root_only || self.id == 0)
            .collect()
    }

    fn filled(&self, locator: &str) -> bool {
        self.inputs.lock().unwrap().iter().any(|(field, _)| field == locator)
    }
}

pub struct FakePage {
    pub state: Arc<PageState>,
}

impl FakePage {
    pub fn inputs(&self) -> Vec<(String, String)> {
        self.state.inputs.lock().unwrap().clone()
    }

    pub fn screen(&self) -> String {
        self.state.screen.lock().unwrap().clone()
    }

    fn element(&self, node: FakeNode) -> FakeElement {
        FakeElement {
            node,
            page: self.state.clone(),
        }
    }
}

#[async_trait]
impl Page for FakePage {
    type Element = FakeElement;

    async fn navigate(&self, url: &str) -> Result<()> {
        self.state.record(format!("navigate {}", url));
        self.state.enter(url)
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.current().url)
    }

    async fn query_all(&self, _selector: &str) -> Result<Vec<FakeElement>> {
        Ok(self
            .state
            .visible_nodes()
            .into_iter()
            .map(|node| self.element(node))
            .collect())
    }

    async fn find(&self, locator: &str) -> Result<Option<FakeElement>> {
        Ok(self
            .state
            .visible_nodes()
            .into_iter()
            .find(|node| node.locator == locator)
            .map(|node| self.element(node)))
    }

    async fn document_bounds(&self) -> Result<Rect> {
        Ok(Rect::new(0.0, 0.0, 1280.0, 720.0))
    }

    async fn close(self) -> Result<()> {
        self.state.record("close".to_string());
        self.state.stats.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeElement {
    node: FakeNode,
    page: Arc<PageState>,
}

#[async_trait]
impl Element for FakeElement {
    async fn class_name(&self) -> Result<String> {
        Ok(self.node.class_name.clone())
    }

    async fn text(&self) -> Result<String> {
        Ok(self.node.text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.node.attrs.get(name).cloned())
    }

    async fn computed_style(&self, property: &str) -> Result<String> {
        if property == "cursor" && self.node.pointer {
            Ok("pointer".to_string())
        } else {
            Ok("auto".to_string())
        }
    }

    async fn bounding_rect(&self) -> Result<Rect> {
        Ok(self.node.rect.unwrap_or_default())
    }

    async fn stable_locator(&self) -> Result<String> {
        Ok(self.node.locator.clone())
    }

    async fn click(&self) -> Result<()> {
        self.page.record(format!("click {}", self.node.locator));
        for request in &self.node.on_click {
            self.page.emit(request);
        }
        match self.node.action {
            Action::Nothing => Ok(()),
            Action::Goto(ref screen) => self.page.enter(screen),
            Action::GotoWhenFilled {
                ref field,
                ref screen,
            } => {
                if self.page.filled(field) {
                    self.page.enter(screen)
                } else {
                    Ok(())
                }
            }
            Action::Panic(ref message) => panic!("{}", message),
        }
    }

    async fn hover(&self) -> Result<()> {
        Ok(())
    }

    async fn input(&self, text: &str) -> Result<()> {
        self.page.record(format!("input {}", self.node.locator));
        self.page
            .inputs
            .lock()
            .unwrap()
            .push((self.node.locator.clone(), text.to_string()));
        Ok(())
    }

    async fn evaluate(&self, _function: &str) -> Result<Value> {
        Ok(Value::Bool(self.node.onclick))
    }
}

pub struct FakeExchange {
    pub request: InterceptedRequest,
    pub fail: bool,
    pub stats: Arc<Stats>,
}

impl FakeExchange {
    pub fn new(method: &str, url: &str, body: &str, fail: bool, stats: Arc<Stats>) -> Self {
        Self {
            request: InterceptedRequest {
                url: url.to_string(),
                method: method.to_string(),
                headers: Headers::new(),
                body: body.to_string(),
            },
            fail,
            stats,
        }
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    fn request(&self) -> &InterceptedRequest {
        &self.request
    }

    async fn complete(&mut self) -> Result<InterceptedResponse> {
        self.stats.forwarded.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ScanError::InterceptLoadFailed {
                url: self.request.url.clone(),
                reason: "connection reset".to_string(),
            });
        }
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(InterceptedResponse {
            status: 200,
            headers,
            body: format!(r#"{{"path":"{}"}}"#, self.request.url),
        })
    }
}

/// Test explorer settings: fast polling, short hop timeout.
pub fn fast_options(workers: usize) -> spelunk_scanner::ExploreOptions {
    spelunk_scanner::ExploreOptions::default()
        .with_workers(workers)
        .with_poll_interval(Duration::from_millis(5))
        .with_settle_timeout(Duration::from_millis(50))
        .with_hop_timeout(Duration::from_millis(100))
}
