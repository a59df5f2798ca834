//! Decides which elements on a page are worth clicking.

use crate::driver::{Element, Page, Rect};
use crate::error::Result;
use tracing::debug;

/// Smallest clipped area an element may have and still be considered a target.
pub const MIN_CLICKABLE_AREA: f64 = 20.0;

const CLICKABLE_TAGS: &[&str] = &["HTMLButtonElement", "HTMLAnchorElement"];

const HAS_CLICK_HANDLER_JS: &str = "function() { return this.onclick != null; }";

/// What the classifier needs to know about a single element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSnapshot {
    pub class_name: String,
    pub has_click_handler: bool,
    pub pointer_cursor: bool,
    /// Bounding rectangle already clipped to the document bounds.
    pub rect: Rect,
}

/// A classified element together with how to find it again.
#[derive(Debug, Clone)]
pub struct Clickable<E> {
    pub element: E,
    pub locator: String,
    pub text: String,
    /// Display label, see [`printable`].
    pub label: String,
    pub rect: Rect,
}

pub fn is_clickable(snapshot: &ElementSnapshot) -> bool {
    if snapshot.class_name.starts_with("SVG") {
        return false;
    }
    let interactive = CLICKABLE_TAGS.contains(&snapshot.class_name.as_str())
        || snapshot.has_click_handler
        || snapshot.pointer_cursor;
    interactive && snapshot.rect.area() >= MIN_CLICKABLE_AREA
}

/// Drop every item whose rectangle lies inside another item's rectangle.
///
/// The outer target survives. When two rectangles are identical the one that
/// comes first is kept.
pub fn reduce_contained<T>(items: Vec<(T, Rect)>) -> Vec<T> {
    let rects: Vec<Rect> = items.iter().map(|(_, rect)| *rect).collect();
    items
        .into_iter()
        .enumerate()
        .filter(|(i, (_, inner))| {
            !rects.iter().enumerate().any(|(j, outer)| {
                if *i == j || !outer.contains(inner) {
                    return false;
                }
                // identical rectangles: only an earlier element swallows a later one
                !inner.contains(outer) || j < *i
            })
        })
        .map(|(_, (item, _))| item)
        .collect()
}

/// Collapse whitespace so labels stay on one log line.
pub fn normalize_label(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub async fn snapshot<E: Element>(element: &E, bounds: &Rect) -> Result<ElementSnapshot> {
    let class_name = element.class_name().await?;
    let has_click_handler = element
        .evaluate(HAS_CLICK_HANDLER_JS)
        .await?
        .as_bool()
        .unwrap_or(false);
    let pointer_cursor = element.computed_style("cursor").await? == "pointer";
    let rect = element.bounding_rect().await?.clip(bounds);
    Ok(ElementSnapshot {
        class_name,
        has_click_handler,
        pointer_cursor,
        rect,
    })
}

/// Human readable label: the element text, else its id, else its locator.
pub async fn printable<E: Element>(element: &E, locator: &str) -> String {
    if let Ok(text) = element.text().await {
        let text = normalize_label(&text);
        if !text.is_empty() {
            return text;
        }
    }
    if let Ok(Some(id)) = element.attribute("id").await
        && !id.is_empty()
    {
        return id;
    }
    locator.to_string()
}

/// Classify every element on `page` and keep the outermost clickable targets.
pub async fn find_clickable<P: Page>(page: &P) -> Result<Vec<Clickable<P::Element>>> {
    let bounds = page.document_bounds().await?;
    let elements = page.query_all("*").await?;
    let total = elements.len();

    let mut candidates = Vec::new();
    for element in elements {
        let snapshot = match snapshot(&element, &bounds).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Skipping element that vanished mid-scan: {}", e);
                continue;
            }
        };
        if is_clickable(&snapshot) {
            candidates.push((element, snapshot.rect));
        }
    }

    let mut clickable = Vec::new();
    for (element, rect) in reduce_candidates(candidates) {
        let locator = match element.stable_locator().await {
            Ok(locator) => locator,
            Err(e) => {
                debug!("Skipping element without a locator: {}", e);
                continue;
            }
        };
        let text = element
            .text()
            .await
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        let label = printable(&element, &locator).await;
        debug!("Clickable: {}", label);
        clickable.push(Clickable {
            element,
            locator,
            text,
            label,
            rect,
        });
    }

    debug!("{} of {} elements are clickable", clickable.len(), total);
    Ok(clickable)
}

fn reduce_candidates<E>(candidates: Vec<(E, Rect)>) -> Vec<(E, Rect)> {
    let with_rects = candidates
        .into_iter()
        .map(|(element, rect)| ((element, rect), rect))
        .collect();
    reduce_contained(with_rects)
}
