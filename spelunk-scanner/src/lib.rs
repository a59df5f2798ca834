pub mod chrome;
pub mod classifier;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod explorer;
pub mod frontier;
pub mod location;
pub mod login;
pub mod recorder;
pub mod session;

pub use chrome::{ChromeBrowser, ChromeOptions, scan_site};
pub use classifier::{Clickable, find_clickable, is_clickable, reduce_contained};
pub use driver::{Browser, Element, Exchange, Page, Rect};
pub use endpoint::{Endpoint, EndpointRequest, EndpointResponse, EndpointSet};
pub use error::{Result, ScanError};
pub use explorer::{ExploreOptions, ExploreProgress, Explorer, TraversalSummary};
pub use location::Location;
pub use login::{Credentials, LoginOptions, login};
pub use recorder::EndpointRecorder;
pub use session::{ScanOutcome, Session};
