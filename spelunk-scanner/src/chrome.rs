//! Chrome DevTools Protocol implementation of the driver traits.

use crate::driver::{
    Browser, Element, Exchange, ExchangeReceiver, ExchangeSender, InterceptedRequest,
    InterceptedResponse, Page, Rect,
};
use crate::endpoint::Headers;
use crate::error::{Result, ScanError};
use crate::explorer::ExploreOptions;
use crate::login::Credentials;
use crate::session::{ScanOutcome, Session};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, GetResponseBodyParams, RequestId,
    RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCreated, TargetId};
use chromiumoxide::listeners::EventStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CLASS_NAME_JS: &str =
    "function() { return Object.prototype.toString.call(this).slice(8, -1); }";

const BOUNDING_RECT_JS: &str = "function() {
    const r = this.getBoundingClientRect();
    return JSON.stringify({
        left: r.left + window.scrollX,
        top: r.top + window.scrollY,
        right: r.right + window.scrollX,
        bottom: r.bottom + window.scrollY,
    });
}";

const DOCUMENT_BOUNDS_JS: &str = "JSON.stringify({
    left: 0,
    top: 0,
    right: Math.max(document.documentElement.scrollWidth, window.innerWidth),
    bottom: Math.max(document.documentElement.scrollHeight, window.innerHeight),
})";

const LOCATOR_JS: &str = "function() {
    const parts = [];
    let el = this;
    while (el && el.nodeType === 1 && el !== document.documentElement) {
        let i = 1;
        let sibling = el;
        while ((sibling = sibling.previousElementSibling)) i++;
        parts.unshift(el.tagName.toLowerCase() + ':nth-child(' + i + ')');
        el = el.parentElement;
    }
    parts.unshift('html');
    return parts.join(' > ');
}";

const HOVER_JS: &str = "function() {
    for (const type of ['mouseover', 'mouseenter', 'mousemove']) {
        this.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, view: window }));
    }
}";

const CLICK_JS: &str = "function() { this.click && this.click(); }";

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    /// DevTools endpoint of a running browser, `http://host:port` or a `ws://` URL.
    /// `None` launches a local browser.
    pub endpoint: Option<String>,
    pub headless: bool,
    pub window_size: (u32, u32),
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            headless: true,
            window_size: (1920, 1080),
        }
    }
}

struct Interception {
    pattern: String,
    sender: ExchangeSender,
}

type SharedInterception = Arc<Mutex<Option<Interception>>>;
type Popups = Arc<Mutex<PopupRegistry<chromiumoxide::Page>>>;

const POPUP_ATTACH_ATTEMPTS: usize = 20;
const POPUP_ATTACH_INTERVAL: Duration = Duration::from_millis(50);

pub struct ChromeBrowser {
    browser: Arc<chromiumoxide::Browser>,
    handler: JoinHandle<()>,
    popup_watcher: JoinHandle<()>,
    interception: SharedInterception,
    popups: Popups,
}

impl ChromeBrowser {
    pub async fn start(options: &ChromeOptions) -> Result<Self> {
        match options.endpoint {
            Some(ref endpoint) => Self::connect(endpoint).await,
            None => Self::launch(options).await,
        }
    }

    /// Attach to an already running browser.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let ws_url = discover_websocket_url(endpoint).await?;
        info!("Connecting to browser at {}", ws_url);
        let (browser, mut handler) = chromiumoxide::Browser::connect(ws_url.clone())
            .await
            .map_err(|e| ScanError::FatalConnection(format!("{}: {}", ws_url, e)))?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });
        Self::from_parts(browser, handler).await
    }

    pub async fn launch(options: &ChromeOptions) -> Result<Self> {
        info!("Launching local browser (headless: {})", options.headless);
        let mut config = BrowserConfig::builder()
            .no_sandbox()
            .window_size(options.window_size.0, options.window_size.1)
            .args(vec!["--disable-dev-shm-usage", "--disable-gpu"]);
        if !options.headless {
            config = config.with_head();
        }
        let config = config
            .build()
            .map_err(|e| ScanError::FatalConnection(format!("Browser config error: {}", e)))?;

        let (browser, mut handler) = chromiumoxide::Browser::launch(config)
            .await
            .map_err(|e| ScanError::FatalConnection(format!("Failed to launch browser: {}", e)))?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });
        Self::from_parts(browser, handler).await
    }

    async fn from_parts(browser: chromiumoxide::Browser, handler: JoinHandle<()>) -> Result<Self> {
        let created = match browser.event_listener::<EventTargetCreated>().await {
            Ok(created) => created,
            Err(e) => {
                handler.abort();
                return Err(ScanError::FatalConnection(format!(
                    "could not watch browser targets: {}",
                    e
                )));
            }
        };

        let browser = Arc::new(browser);
        let interception = SharedInterception::default();
        let popups = Popups::default();
        let popup_watcher = tokio::spawn(watch_popups(
            browser.clone(),
            created,
            interception.clone(),
            popups.clone(),
        ));
        Ok(Self {
            browser,
            handler,
            popup_watcher,
            interception,
            popups,
        })
    }
}

/// Enable Fetch interception on `page` and forward its paused requests.
async fn intercept_page(
    page: &chromiumoxide::Page,
    interception: &SharedInterception,
) -> Result<()> {
    let (pattern, sender) = match *interception.lock().await {
        Some(ref interception) => (interception.pattern.clone(), interception.sender.clone()),
        None => return Ok(()),
    };

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(ScanError::driver)?;
    let enable = EnableParams::builder()
        .pattern(
            RequestPattern::builder()
                .url_pattern(pattern)
                .request_stage(RequestStage::Response)
                .build(),
        )
        .build();
    page.execute(enable).await.map_err(ScanError::driver)?;

    let page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let exchange = ChromeExchange::from_event(page.clone(), &event);
            if let Err(mpsc::error::SendError(mut exchange)) = sender.send(Box::new(exchange)) {
                // nobody records anymore, but the request must still go through
                let _ = exchange.complete().await;
            }
        }
    });
    Ok(())
}

/// Tabs opened by clicks (`target=_blank`, `window.open`) get the same
/// interception as worker pages and are closed along with their opener.
async fn watch_popups(
    browser: Arc<chromiumoxide::Browser>,
    mut created: EventStream<EventTargetCreated>,
    interception: SharedInterception,
    popups: Popups,
) {
    while let Some(event) = created.next().await {
        let raw = serde_json::to_value(&*event).unwrap_or(Value::Null);
        let Some(popup) = popup_target(&raw["targetInfo"]) else {
            continue;
        };
        let Some(page) = attach_popup(&browser, &popup.target_id).await else {
            warn!("Could not attach to popup {}", popup.target_id);
            continue;
        };
        if let Err(e) = intercept_page(&page, &interception).await {
            warn!("Popup {} is not intercepted: {}", popup.target_id, e);
        }
        debug!("Popup {} opened by {}", popup.target_id, popup.opener_id);
        popups
            .lock()
            .await
            .add(&popup.opener_id, &popup.target_id, page);
    }
}

async fn attach_popup(
    browser: &chromiumoxide::Browser,
    target_id: &str,
) -> Option<chromiumoxide::Page> {
    for _ in 0..POPUP_ATTACH_ATTEMPTS {
        if let Ok(page) = browser.get_page(TargetId::new(target_id)).await {
            return Some(page);
        }
        tokio::time::sleep(POPUP_ATTACH_INTERVAL).await;
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupTarget {
    pub target_id: String,
    pub opener_id: String,
}

/// A CDP `Target.TargetInfo` describing a page opened by another page.
pub fn popup_target(info: &Value) -> Option<PopupTarget> {
    if info["type"].as_str() != Some("page") {
        return None;
    }
    Some(PopupTarget {
        target_id: info["targetId"].as_str()?.to_string(),
        opener_id: info["openerId"].as_str()?.to_string(),
    })
}

/// Popup tabs keyed by the tab that opened them.
#[derive(Debug)]
pub struct PopupRegistry<T> {
    opened: HashMap<String, Vec<(String, T)>>,
}

impl<T> Default for PopupRegistry<T> {
    fn default() -> Self {
        Self {
            opened: HashMap::new(),
        }
    }
}

impl<T> PopupRegistry<T> {
    pub fn add(&mut self, opener_id: &str, target_id: &str, tab: T) {
        self.opened
            .entry(opener_id.to_string())
            .or_default()
            .push((target_id.to_string(), tab));
    }

    /// Everything opened from `opener_id`, directly or through other popups.
    pub fn release(&mut self, opener_id: &str) -> Vec<T> {
        let mut released = Vec::new();
        let mut pending = vec![opener_id.to_string()];
        while let Some(id) = pending.pop() {
            for (child, tab) in self.opened.remove(&id).unwrap_or_default() {
                pending.push(child);
                released.push(tab);
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.opened.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        self.popup_watcher.abort();
        self.handler.abort();
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    type Page = ChromePage;

    async fn open_page(&self, url: &str) -> Result<ChromePage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(ScanError::driver)?;
        let page = ChromePage {
            page,
            popups: self.popups.clone(),
        };
        if let Err(e) = intercept_page(&page.page, &self.interception).await {
            let _ = page.close().await;
            return Err(e);
        }
        if let Err(e) = page.page.goto(url).await {
            let _ = page.close().await;
            return Err(ScanError::Driver(format!("navigation to {} failed: {}", url, e)));
        }
        Ok(page)
    }

    async fn intercept_requests(&self, pattern: &str) -> Result<ExchangeReceiver> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.interception.lock().await = Some(Interception {
            pattern: pattern.to_string(),
            sender,
        });
        Ok(receiver)
    }
}

pub struct ChromePage {
    page: chromiumoxide::Page,
    popups: Popups,
}

#[async_trait]
impl Page for ChromePage {
    type Element = ChromeElement;

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| ScanError::Driver(format!("navigation to {} failed: {}", url, e)))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(ScanError::driver)?
            .unwrap_or_default())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ChromeElement>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(ScanError::driver)?;
        Ok(elements.into_iter().map(ChromeElement::new).collect())
    }

    async fn find(&self, locator: &str) -> Result<Option<ChromeElement>> {
        // find_element errors on a miss, find_elements does not
        let elements = self
            .page
            .find_elements(locator)
            .await
            .map_err(ScanError::driver)?;
        Ok(elements.into_iter().next().map(ChromeElement::new))
    }

    async fn document_bounds(&self) -> Result<Rect> {
        let json: String = self
            .page
            .evaluate(DOCUMENT_BOUNDS_JS)
            .await
            .map_err(ScanError::driver)?
            .into_value()
            .map_err(ScanError::driver)?;
        serde_json::from_str(&json).map_err(ScanError::driver)
    }

    async fn close(self) -> Result<()> {
        let own_id: &str = self.page.target_id().as_ref();
        let popups = self.popups.lock().await.release(own_id);
        for popup in popups {
            if let Err(e) = popup.close().await {
                debug!("Failed to close popup: {}", e);
            }
        }
        self.page.close().await.map_err(ScanError::driver)
    }
}

pub struct ChromeElement {
    element: chromiumoxide::Element,
}

impl ChromeElement {
    fn new(element: chromiumoxide::Element) -> Self {
        Self { element }
    }

    async fn call(&self, function: &str) -> Result<Value> {
        let returns = self
            .element
            .call_js_fn(function, false)
            .await
            .map_err(ScanError::driver)?;
        Ok(returns.result.value.unwrap_or(Value::Null))
    }

    async fn call_string(&self, function: &str) -> Result<String> {
        match self.call(function).await? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

#[async_trait]
impl Element for ChromeElement {
    async fn class_name(&self) -> Result<String> {
        self.call_string(CLASS_NAME_JS).await
    }

    async fn text(&self) -> Result<String> {
        Ok(self
            .element
            .inner_text()
            .await
            .map_err(ScanError::driver)?
            .unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.element.attribute(name).await.map_err(ScanError::driver)
    }

    async fn computed_style(&self, property: &str) -> Result<String> {
        let property = serde_json::to_string(property).map_err(ScanError::driver)?;
        let function = format!(
            "function() {{ return window.getComputedStyle(this).getPropertyValue({}); }}",
            property
        );
        self.call_string(&function).await
    }

    async fn bounding_rect(&self) -> Result<Rect> {
        let json = self.call_string(BOUNDING_RECT_JS).await?;
        serde_json::from_str(&json).map_err(ScanError::driver)
    }

    async fn stable_locator(&self) -> Result<String> {
        self.call_string(LOCATOR_JS).await
    }

    async fn click(&self) -> Result<()> {
        self.call(CLICK_JS).await.map(|_| ())
    }

    async fn hover(&self) -> Result<()> {
        self.call(HOVER_JS).await.map(|_| ())
    }

    async fn input(&self, text: &str) -> Result<()> {
        self.element.focus().await.map_err(ScanError::driver)?;
        self.element.type_str(text).await.map_err(ScanError::driver)?;
        Ok(())
    }

    async fn evaluate(&self, function: &str) -> Result<Value> {
        self.call(function).await
    }
}

/// How a paused response is turned into an [`InterceptedResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePlan {
    /// The load failed before a usable response arrived.
    Skip(String),
    /// Redirects have no body at the response stage.
    HeadersOnly(u16),
    ReadBody(u16),
}

pub fn plan_response(
    status: Option<u16>,
    error_reason: Option<&str>,
    headers: &Headers,
) -> ResponsePlan {
    if let Some(reason) = error_reason {
        return ResponsePlan::Skip(reason.to_string());
    }
    let Some(status) = status else {
        return ResponsePlan::Skip("no response status".to_string());
    };
    let has_location = headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("location"));
    if (300..400).contains(&status) || has_location {
        ResponsePlan::HeadersOnly(status)
    } else {
        ResponsePlan::ReadBody(status)
    }
}

/// Resumes a paused request at most once, whichever path gets there first.
#[derive(Debug, Default)]
pub struct ResumeOnce {
    resumed: bool,
}

impl ResumeOnce {
    /// True for the first caller only.
    pub fn take(&mut self) -> bool {
        !std::mem::replace(&mut self.resumed, true)
    }

    pub fn is_done(&self) -> bool {
        self.resumed
    }
}

/// A request paused at the response stage.
pub struct ChromeExchange {
    page: chromiumoxide::Page,
    request_id: RequestId,
    request: InterceptedRequest,
    status: Option<u16>,
    error_reason: Option<String>,
    response_headers: Headers,
    resume: ResumeOnce,
}

impl ChromeExchange {
    fn from_event(page: chromiumoxide::Page, event: &EventRequestPaused) -> Self {
        let raw = serde_json::to_value(event).unwrap_or(Value::Null);
        let request = &raw["request"];
        Self {
            page,
            request_id: event.request_id.clone(),
            request: InterceptedRequest {
                url: request["url"].as_str().unwrap_or_default().to_string(),
                method: request["method"].as_str().unwrap_or("GET").to_string(),
                headers: headers_from_object(&request["headers"]),
                body: request_body(request),
            },
            status: raw["responseStatusCode"]
                .as_u64()
                .and_then(|code| u16::try_from(code).ok()),
            error_reason: raw["responseErrorReason"].as_str().map(str::to_string),
            response_headers: headers_from_entries(&raw["responseHeaders"]),
            resume: ResumeOnce::default(),
        }
    }

    async fn resume(&mut self) {
        if !self.resume.take() {
            return;
        }
        if let Err(e) = self
            .page
            .execute(ContinueRequestParams::new(self.request_id.clone()))
            .await
        {
            debug!("Failed to resume {}: {}", self.request.url, e);
        }
    }

    fn load_failed(&self, reason: impl Into<String>) -> ScanError {
        ScanError::InterceptLoadFailed {
            url: self.request.url.clone(),
            reason: reason.into(),
        }
    }

    fn response(&self, status: u16, body: String) -> InterceptedResponse {
        InterceptedResponse {
            status,
            headers: self.response_headers.clone(),
            body,
        }
    }
}

#[async_trait]
impl Exchange for ChromeExchange {
    fn request(&self) -> &InterceptedRequest {
        &self.request
    }

    async fn complete(&mut self) -> Result<InterceptedResponse> {
        if self.resume.is_done() {
            return Err(self.load_failed("exchange already completed"));
        }

        match plan_response(
            self.status,
            self.error_reason.as_deref(),
            &self.response_headers,
        ) {
            ResponsePlan::Skip(reason) => {
                self.resume().await;
                Err(self.load_failed(reason))
            }
            ResponsePlan::HeadersOnly(status) => {
                self.resume().await;
                Ok(self.response(status, String::new()))
            }
            ResponsePlan::ReadBody(status) => {
                let body = self
                    .page
                    .execute(GetResponseBodyParams::new(self.request_id.clone()))
                    .await;
                self.resume().await;
                let body = match body {
                    Ok(body) => decode_body(&body.result.body, body.result.base64_encoded),
                    Err(e) => {
                        // status and headers are still worth recording
                        debug!("No body for {}: {}", self.request.url, e);
                        String::new()
                    }
                };
                Ok(self.response(status, body))
            }
        }
    }
}

impl Drop for ChromeExchange {
    fn drop(&mut self) {
        if !self.resume.take() {
            return;
        }
        let page = self.page.clone();
        let request_id = self.request_id.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = page.execute(ContinueRequestParams::new(request_id)).await;
            });
        }
    }
}

/// CDP `Network.Headers`: a flat JSON object.
pub fn headers_from_object(value: &Value) -> Headers {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(name, value)| {
                    let value = value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string());
                    (name.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// CDP `Fetch.HeaderEntry` list. Repeated names are joined with `, `.
pub fn headers_from_entries(value: &Value) -> Headers {
    let mut headers = Headers::new();
    for entry in value.as_array().into_iter().flatten() {
        let (Some(name), Some(val)) = (entry["name"].as_str(), entry["value"].as_str()) else {
            continue;
        };
        headers
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(val);
            })
            .or_insert_with(|| val.to_string());
    }
    headers
}

/// Request body from `postData`, falling back to the base64 `postDataEntries`.
pub fn request_body(request: &Value) -> String {
    if let Some(body) = request["postData"].as_str() {
        return body.to_string();
    }
    request["postDataEntries"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry["bytes"].as_str())
        .map(|bytes| decode_body(bytes, true))
        .collect()
}

pub fn decode_body(body: &str, base64_encoded: bool) -> String {
    if !base64_encoded {
        return body.to_string();
    }
    match STANDARD.decode(body) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!("Undecodable response body: {}", e);
            String::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct BrowserVersion {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Resolve the browser-level WebSocket URL from a DevTools HTTP endpoint.
pub async fn discover_websocket_url(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }
    let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    debug!("Fetching browser version from {}", version_url);

    let unreachable =
        |e: reqwest::Error| ScanError::FatalConnection(format!("{}: {}", endpoint, e));
    let version: BrowserVersion = reqwest::get(&version_url)
        .await
        .map_err(unreachable)?
        .error_for_status()
        .map_err(unreachable)?
        .json()
        .await
        .map_err(unreachable)?;
    Ok(version.web_socket_debugger_url)
}

/// Connect to the browser at `endpoint`, log in and explore `url`.
pub async fn scan_site(
    endpoint: &str,
    url: &str,
    username: &str,
    password: &str,
    budget: Option<Duration>,
) -> Result<ScanOutcome> {
    let browser = Arc::new(ChromeBrowser::connect(endpoint).await?);
    let credentials = Credentials::new(username, password);
    Session::new(browser)
        .with_explorer(ExploreOptions::default())
        .run(url, Some(&credentials), budget)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_headers_from_object() {
        let headers = headers_from_object(&json!({
            "Content-Type": "application/json",
            "X-Count": 3,
        }));
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(headers.get("X-Count").unwrap(), "3");
        assert!(headers_from_object(&Value::Null).is_empty());
    }

    #[test]
    fn test_headers_from_entries_joins_repeats() {
        let headers = headers_from_entries(&json!([
            {"name": "set-cookie", "value": "a=1"},
            {"name": "set-cookie", "value": "b=2"},
            {"name": "server", "value": "nginx"},
            {"name": "broken"},
        ]));
        assert_eq!(headers.get("set-cookie").unwrap(), "a=1, b=2");
        assert_eq!(headers.get("server").unwrap(), "nginx");
        assert_eq!(headers.len(), 2);
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_plan_response_redirect_skips_body() {
        let location = headers(&[("Location", "/dashboard")]);
        assert_eq!(
            plan_response(Some(302), None, &location),
            ResponsePlan::HeadersOnly(302)
        );
        assert_eq!(
            plan_response(Some(307), None, &Headers::new()),
            ResponsePlan::HeadersOnly(307)
        );
        // a 201 with a location header is treated the same way
        assert_eq!(
            plan_response(Some(201), None, &headers(&[("location", "/api/items/7")])),
            ResponsePlan::HeadersOnly(201)
        );
    }

    #[test]
    fn test_plan_response_error_reason_skips() {
        assert_eq!(
            plan_response(None, Some("ConnectionRefused"), &Headers::new()),
            ResponsePlan::Skip("ConnectionRefused".to_string())
        );
        assert_eq!(
            plan_response(Some(200), Some("Aborted"), &Headers::new()),
            ResponsePlan::Skip("Aborted".to_string())
        );
        assert_eq!(
            plan_response(None, None, &Headers::new()),
            ResponsePlan::Skip("no response status".to_string())
        );
    }

    #[test]
    fn test_plan_response_reads_body() {
        let json = headers(&[("content-type", "application/json")]);
        assert_eq!(
            plan_response(Some(200), None, &json),
            ResponsePlan::ReadBody(200)
        );
        assert_eq!(
            plan_response(Some(404), None, &Headers::new()),
            ResponsePlan::ReadBody(404)
        );
    }

    #[test]
    fn test_resume_once() {
        let mut resume = ResumeOnce::default();
        assert!(!resume.is_done());
        assert!(resume.take());
        assert!(resume.is_done());
        // completion and drop both ask, only one continue is sent
        assert!(!resume.take());
        assert!(!resume.take());
    }

    #[test]
    fn test_popup_target_needs_page_with_opener() {
        let popup = popup_target(&json!({
            "targetId": "T2",
            "type": "page",
            "openerId": "T1",
            "url": "about:blank",
        }));
        assert_eq!(
            popup,
            Some(PopupTarget {
                target_id: "T2".to_string(),
                opener_id: "T1".to_string(),
            })
        );

        // tabs the worker pool opened itself have no opener
        assert!(popup_target(&json!({"targetId": "T3", "type": "page"})).is_none());
        assert!(
            popup_target(&json!({"targetId": "W1", "type": "service_worker", "openerId": "T1"}))
                .is_none()
        );
    }

    #[test]
    fn test_popup_registry_releases_descendants() {
        let mut popups = PopupRegistry::default();
        popups.add("worker-1", "p1", "p1");
        popups.add("p1", "p1a", "p1a");
        popups.add("worker-2", "p2", "p2");
        assert_eq!(popups.len(), 3);

        let mut released = popups.release("worker-1");
        released.sort();
        assert_eq!(released, vec!["p1", "p1a"]);
        assert_eq!(popups.len(), 1);

        assert!(popups.release("worker-1").is_empty());
        assert_eq!(popups.release("worker-2"), vec!["p2"]);
        assert!(popups.is_empty());
    }

    #[test]
    fn test_request_body_prefers_post_data() {
        let request = json!({"postData": "user=admin", "postDataEntries": [{"bytes": "eA=="}]});
        assert_eq!(request_body(&request), "user=admin");

        // "user=admin" base64 encoded
        let request = json!({"postDataEntries": [{"bytes": "dXNlcj1hZG1pbg=="}]});
        assert_eq!(request_body(&request), "user=admin");

        assert_eq!(request_body(&json!({})), "");
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body("plain", false), "plain");
        assert_eq!(decode_body("eyJvayI6dHJ1ZX0=", true), r#"{"ok":true}"#);
        assert_eq!(decode_body("not base64!", true), "");
    }

    #[tokio::test]
    async fn test_discover_websocket_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Browser": "Chrome/120.0.0.0",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc",
            })))
            .mount(&server)
            .await;

        let endpoint = format!("{}/", server.uri());
        let ws_url = discover_websocket_url(&endpoint).await.unwrap();
        assert_eq!(ws_url, "ws://127.0.0.1:9222/devtools/browser/abc");
    }

    #[tokio::test]
    async fn test_discover_websocket_url_passes_ws_through() {
        let ws_url = discover_websocket_url("ws://localhost:9222/devtools/browser/x")
            .await
            .unwrap();
        assert_eq!(ws_url, "ws://localhost:9222/devtools/browser/x");
    }

    #[tokio::test]
    async fn test_discover_websocket_url_server_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = discover_websocket_url(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ScanError::FatalConnection(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_discover_websocket_url_unreachable_is_fatal() {
        // Reserve a port, then free it so nothing listens there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = discover_websocket_url(&format!("http://127.0.0.1:{}", port))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::FatalConnection(_)));
    }

    #[tokio::test]
    async fn test_scan_site_without_browser_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = scan_site(&server.uri(), "http://app/login", "admin", "secret", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::FatalConnection(_)));
    }
}
