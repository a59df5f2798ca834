//! Browser driver abstraction.
//!
//! The explorer only needs a narrow slice of what a browser can do: open
//! isolated pages, inspect and click elements, and observe network traffic.
//! [`crate::chrome`] implements these traits over the Chrome DevTools
//! Protocol; the integration tests implement them in memory.

use crate::endpoint::Headers;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Axis-aligned rectangle in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Clip to `bounds`. A rectangle entirely outside the bounds ends up with zero area.
    pub fn clip(&self, bounds: &Rect) -> Rect {
        Rect {
            left: self.left.max(bounds.left),
            top: self.top.max(bounds.top),
            right: self.right.min(bounds.right),
            bottom: self.bottom.min(bounds.bottom),
        }
    }

    pub fn contains(&self, other: &Rect) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

/// An in-flight network exchange paused by the driver.
#[async_trait]
pub trait Exchange: Send {
    fn request(&self) -> &InterceptedRequest;

    /// Let the request through to the network and return the completed response.
    ///
    /// Implementations must release the paused request even when reading the
    /// response fails.
    async fn complete(&mut self) -> Result<InterceptedResponse>;
}

pub type ExchangeReceiver = mpsc::UnboundedReceiver<Box<dyn Exchange>>;
pub type ExchangeSender = mpsc::UnboundedSender<Box<dyn Exchange>>;

#[async_trait]
pub trait Browser: Send + Sync + 'static {
    type Page: Page;

    /// Open a new, private page and navigate it to `url`.
    async fn open_page(&self, url: &str) -> Result<Self::Page>;

    /// Start intercepting every request whose URL matches `pattern` on every
    /// page opened from now on.
    async fn intercept_requests(&self, pattern: &str) -> Result<ExchangeReceiver>;
}

#[async_trait]
pub trait Page: Send + Sync + 'static {
    type Element: Element;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Self::Element>>;

    /// Resolve a locator produced by [`Element::stable_locator`]. `Ok(None)`
    /// means the element is not (or no longer) on the page.
    async fn find(&self, locator: &str) -> Result<Option<Self::Element>>;

    /// Document bounds used to clip element rectangles.
    async fn document_bounds(&self) -> Result<Rect>;

    async fn close(self) -> Result<()>;
}

#[async_trait]
pub trait Element: Send + Sync + 'static {
    /// DOM interface name, e.g. `HTMLButtonElement` or `SVGPathElement`.
    async fn class_name(&self) -> Result<String>;

    async fn text(&self) -> Result<String>;

    async fn attribute(&self, name: &str) -> Result<Option<String>>;

    async fn computed_style(&self, property: &str) -> Result<String>;

    /// Bounding rectangle in document coordinates (unclipped).
    async fn bounding_rect(&self) -> Result<Rect>;

    /// A locator that resolves back to this element on a freshly loaded page.
    async fn stable_locator(&self) -> Result<String>;

    async fn click(&self) -> Result<()>;

    async fn hover(&self) -> Result<()>;

    async fn input(&self, text: &str) -> Result<()>;

    /// Call `function` with the element bound to `this` and return its value.
    async fn evaluate(&self, function: &str) -> Result<serde_json::Value>;
}
