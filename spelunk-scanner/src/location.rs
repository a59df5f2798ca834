use serde::{Deserialize, Serialize};

/// A replayable click path from a root page to one interactive element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Element locators, clicked in order.
    pub hops: Vec<String>,
    /// Label of the element the last hop targets.
    pub text: String,
    /// URL the page was at when the hops were computed.
    pub path: String,
}

impl Location {
    pub fn root(locator: String, text: String, path: String) -> Self {
        Self {
            hops: vec![locator],
            text,
            path,
        }
    }

    pub fn child(&self, locator: String, text: String, path: String) -> Self {
        let mut hops = Vec::with_capacity(self.hops.len() + 1);
        hops.extend(self.hops.iter().cloned());
        hops.push(locator);
        Self { hops, text, path }
    }

    /// Identity in the visited cache. `path` is deliberately not part of it.
    pub fn key(&self) -> String {
        format!("{}.{}", self.text, self.hops.join(" -> "))
    }

    pub fn depth(&self) -> usize {
        self.hops.len()
    }

    pub fn visits(&self, locator: &str) -> bool {
        self.hops.iter().any(|hop| hop == locator)
    }
}
