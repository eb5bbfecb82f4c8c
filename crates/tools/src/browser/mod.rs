//! Accessibility snapshots with compact element refs.
//!
//! - `snapshot`: walks a page's accessibility tree and assigns `e1..eN`
//! - `refs`: the per-page ref table and cache
//! - `resolver`: maps a ref back to a live element through a `PageDriver`
//! - `cdp_driver` / `fixture`: a Chrome page over CDP, or an in-memory page

pub mod cdp;
pub mod cdp_driver;
pub mod driver;
pub mod error;
pub mod fixture;
pub mod refs;
pub mod resolver;
pub mod session;
pub mod snapshot;
pub mod tool;

pub use cdp_driver::CdpPageDriver;
pub use driver::{DriverError, ElementHandle, PageDriver};
pub use error::RefError;
pub use fixture::{FixtureDriver, FixtureNode};
pub use refs::{ElementDescriptor, RefCache, RefId, RefTable};
pub use session::{PageSession, SnapshotResult};
pub use snapshot::{SnapshotBuilder, SnapshotOptions};
pub use tool::PageRefTool;
