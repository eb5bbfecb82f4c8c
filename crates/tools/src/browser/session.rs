//! One page plus the ref cache that belongs to it.
//!
//! Every operation borrows the session, so a build never interleaves with a
//! resolve on the same page. Callers sharing a session wrap it in
//! `Arc<tokio::sync::Mutex<_>>` and hold the lock for the whole call.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use pagemark_core::SnapshotDefaults;

use super::driver::{ElementHandle, PageDriver};
use super::error::RefError;
use super::refs::{ElementDescriptor, RefCache, RefTable};
use super::resolver::RefResolver;
use super::snapshot::{SnapshotBuilder, SnapshotOptions};

/// What a successful snapshot hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResult {
    pub tree: String,
    pub refs: RefTable,
    /// Cache version after this snapshot was published.
    pub version: u64,
}

pub struct PageSession {
    driver: Arc<dyn PageDriver>,
    cache: RefCache,
    defaults: SnapshotDefaults,
}

impl PageSession {
    pub fn new(driver: Arc<dyn PageDriver>) -> Self {
        Self {
            driver,
            cache: RefCache::new(),
            defaults: SnapshotDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: SnapshotDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Options used when a request leaves every flag unspecified.
    pub fn default_options(&self) -> SnapshotOptions {
        SnapshotOptions::from_defaults(&self.defaults)
    }

    /// Build a snapshot and publish its refs.
    ///
    /// The previous table stays in place if the build fails.
    pub async fn snapshot(&mut self, options: &SnapshotOptions) -> Result<SnapshotResult, RefError> {
        let snapshot = SnapshotBuilder::new(options)
            .with_max_name_len(self.defaults.max_name_len)
            .build(self.driver.as_ref())
            .await?;

        self.cache.replace(snapshot.refs.clone());
        Ok(SnapshotResult {
            tree: snapshot.tree,
            refs: snapshot.refs,
            version: self.cache.version(),
        })
    }

    pub async fn resolve(&self, token: &str) -> Result<ElementHandle, RefError> {
        RefResolver::new(&self.cache)
            .resolve(self.driver.as_ref(), token)
            .await
    }

    /// Descriptor behind a token in the current table, without touching the page.
    pub fn lookup(&self, token: &str) -> Result<&ElementDescriptor, RefError> {
        RefResolver::new(&self.cache).lookup(token)
    }

    /// Load `url`. Refs are dropped even when the driver reports a failure,
    /// since the old document may already be gone.
    pub async fn navigate(&mut self, url: &str) -> Result<(), RefError> {
        let result = self.driver.navigate(url).await;
        self.invalidate();
        result.map_err(|e| {
            warn!(url, error = %e, "Navigation failed");
            RefError::from(e)
        })
    }

    pub async fn reload(&mut self) -> Result<(), RefError> {
        let result = self.driver.reload().await;
        self.invalidate();
        result.map_err(RefError::from)
    }

    pub fn invalidate(&mut self) {
        info!(version = self.cache.version(), "Refs invalidated");
        self.cache.invalidate();
    }

    pub fn cache(&self) -> &RefCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fixture::{FixtureDriver, FixtureNode};

    fn login() -> FixtureNode {
        FixtureNode::new("RootWebArea").named("Login").with_children(vec![
            FixtureNode::new("form").with_id("login").with_children(vec![
                FixtureNode::new("textbox").named("Email"),
                FixtureNode::new("button").named("Sign in"),
            ]),
            FixtureNode::new("link").named("Forgot password"),
        ])
    }

    fn dashboard() -> FixtureNode {
        FixtureNode::new("RootWebArea")
            .named("Dashboard")
            .with_children(vec![FixtureNode::new("button").named("Log out")])
    }

    fn session() -> (Arc<FixtureDriver>, PageSession) {
        let driver = Arc::new(FixtureDriver::new(login()).with_page("https://app.test/home", dashboard()));
        let session = PageSession::new(driver.clone());
        (driver, session)
    }

    #[tokio::test]
    async fn test_snapshot_publishes_refs() {
        let (_, mut session) = session();
        let opts = SnapshotOptions { interactive: true, ..Default::default() };

        let first = session.snapshot(&opts).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.refs.ids(), vec!["e1", "e2", "e3"]);
        assert_eq!(session.cache().list_available(), first.refs.ids());

        let second = session.snapshot(&opts).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(first.tree, second.tree);
    }

    #[tokio::test]
    async fn test_failed_snapshot_keeps_previous_table() {
        let (_, mut session) = session();
        session.snapshot(&SnapshotOptions::default()).await.unwrap();
        let before = session.cache().list_available();

        let scoped = SnapshotOptions {
            scope: Some("#missing".into()),
            ..Default::default()
        };
        let err = session.snapshot(&scoped).await.unwrap_err();
        assert_eq!(err.kind(), "scope_not_found");
        assert_eq!(session.cache().version(), 1);
        assert_eq!(session.cache().list_available(), before);
    }

    #[tokio::test]
    async fn test_scoped_snapshot() {
        let (_, mut session) = session();
        let scoped = SnapshotOptions {
            scope: Some("#login".into()),
            interactive: true,
            ..Default::default()
        };
        let result = session.snapshot(&scoped).await.unwrap();
        assert_eq!(result.refs.len(), 2);
        assert!(!result.tree.contains("Forgot password"));
    }

    #[tokio::test]
    async fn test_resolve_after_snapshot() {
        let (_, mut session) = session();
        session
            .snapshot(&SnapshotOptions { interactive: true, ..Default::default() })
            .await
            .unwrap();
        let handle = session.resolve("@e2").await.unwrap();
        assert_eq!(handle.role, "button");
        assert_eq!(handle.name.as_deref(), Some("Sign in"));
        assert_eq!(session.lookup("e2").unwrap().role(), "button");
        assert!(session.lookup("e99").is_err());
    }

    #[tokio::test]
    async fn test_navigation_invalidates() {
        let (driver, mut session) = session();
        session.snapshot(&SnapshotOptions::default()).await.unwrap();
        assert!(session.cache().is_valid("e1"));

        session.navigate("https://app.test/home").await.unwrap();
        assert_eq!(driver.current_url().as_deref(), Some("https://app.test/home"));
        assert_eq!(session.cache().version(), 0);
        assert_eq!(session.resolve("e1").await.unwrap_err().kind(), "ref_not_found");

        let result = session
            .snapshot(&SnapshotOptions { interactive: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(result.version, 1);
        assert_eq!(session.resolve("e1").await.unwrap().name.as_deref(), Some("Log out"));
    }

    #[tokio::test]
    async fn test_mutated_page_reports_stale_ref() {
        let (driver, mut session) = session();
        session
            .snapshot(&SnapshotOptions { interactive: true, ..Default::default() })
            .await
            .unwrap();

        // The form is gone but no navigation happened, so the table survives.
        driver.set_root(
            FixtureNode::new("RootWebArea")
                .with_children(vec![FixtureNode::new("link").named("Forgot password")]),
        );
        match session.resolve("e2").await.unwrap_err() {
            RefError::RefNotFound { stale, available, .. } => {
                assert!(stale);
                assert_eq!(available, vec!["e1", "e2", "e3"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.resolve("e3").await.unwrap().name.as_deref(), Some("Forgot password"));
    }

    #[tokio::test]
    async fn test_failed_navigation_still_invalidates() {
        let (_, mut session) = session();
        session.snapshot(&SnapshotOptions::default()).await.unwrap();
        let err = session.navigate("https://nowhere.test").await.unwrap_err();
        assert_eq!(err.kind(), "driver_unavailable");
        assert!(session.cache().list_available().is_empty());
    }

    #[tokio::test]
    async fn test_reload_invalidates() {
        let (driver, mut session) = session();
        session.snapshot(&SnapshotOptions::default()).await.unwrap();
        session.reload().await.unwrap();
        assert_eq!(driver.navigations(), 1);
        assert!(session.cache().list_available().is_empty());
    }

    #[tokio::test]
    async fn test_max_name_len_from_defaults() {
        let driver = Arc::new(FixtureDriver::new(
            FixtureNode::new("RootWebArea").with_children(vec![FixtureNode::new("link").named("y".repeat(50))]),
        ));
        let mut session = PageSession::new(driver).with_defaults(SnapshotDefaults {
            max_name_len: 10,
            ..Default::default()
        });
        let opts = session.default_options();
        assert!(opts.compact);
        let result = session.snapshot(&opts).await.unwrap();
        assert!(result.tree.contains("\"yyyyyyy...\""));
    }

    #[tokio::test]
    async fn test_shared_session_serializes_access() {
        let (_, session) = session();
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        let opts = SnapshotOptions { interactive: true, ..Default::default() };

        let mut handles = Vec::new();
        for _ in 0..4 {
            let shared = shared.clone();
            let opts = opts.clone();
            handles.push(tokio::spawn(async move {
                let mut s = shared.lock().await;
                s.snapshot(&opts).await.map(|r| r.version)
            }));
        }
        let mut versions = Vec::new();
        for h in handles {
            versions.push(h.await.unwrap().unwrap());
        }
        versions.sort();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_scoped_ref_resolves_to_shown_duplicate() {
        let driver = Arc::new(FixtureDriver::new(FixtureNode::new("RootWebArea").with_children(vec![
            FixtureNode::new("form").with_id("a").with_children(vec![FixtureNode::new("button").named("Save")]),
            FixtureNode::new("form").with_id("b").with_children(vec![FixtureNode::new("button").named("Save")]),
        ])));
        let mut session = PageSession::new(driver);
        let scoped = SnapshotOptions {
            scope: Some("#b".into()),
            ..Default::default()
        };
        let result = session.snapshot(&scoped).await.unwrap();
        assert_eq!(result.refs.len(), 1);

        assert_eq!(session.resolve("e1").await.unwrap().node, 5);
    }

    #[tokio::test]
    async fn test_depth_limited_ref_resolves_to_shown_duplicate() {
        let driver = Arc::new(FixtureDriver::new(FixtureNode::new("RootWebArea").with_children(vec![
            FixtureNode::new("group").with_children(vec![
                FixtureNode::new("group").with_children(vec![FixtureNode::new("button").named("Save")]),
            ]),
            FixtureNode::new("button").named("Save"),
        ])));
        let mut session = PageSession::new(driver);
        let shallow = SnapshotOptions {
            max_depth: Some(1),
            ..Default::default()
        };
        let result = session.snapshot(&shallow).await.unwrap();
        assert!(result.tree.contains("- button \"Save\" [ref=e1] [nth=1]"));

        assert_eq!(session.resolve("e1").await.unwrap().node, 5);
    }

    #[tokio::test]
    async fn test_clickable_heading_keeps_ordinals_aligned() {
        let driver = Arc::new(FixtureDriver::new(FixtureNode::new("RootWebArea").with_children(vec![
            FixtureNode::new("heading").named("Plan").clickable("div.plan"),
            FixtureNode::new("heading").named("Plan"),
        ])));
        let mut session = PageSession::new(driver);
        session
            .snapshot(&SnapshotOptions { cursor: true, ..Default::default() })
            .await
            .unwrap();

        assert_eq!(session.resolve("e1").await.unwrap().node, 2);
        assert_eq!(session.resolve("e2").await.unwrap().node, 3);
    }

    #[tokio::test]
    async fn test_unavailable_driver_keeps_previous_table() {
        let (driver, mut session) = session();
        session.snapshot(&SnapshotOptions::default()).await.unwrap();
        let before = session.cache().list_available();

        driver.unload();
        let err = session.snapshot(&SnapshotOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), "driver_unavailable");
        assert_eq!(session.cache().version(), 1);
        assert_eq!(session.cache().list_available(), before);
    }
}
