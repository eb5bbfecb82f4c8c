//! Turns a ref token back into an element handle.
//!
//! Resolution only addresses; it never acts on the page. It guarantees the
//! ref existed in the last snapshot and that the driver could find a matching
//! element at lookup time, nothing about what happens afterwards.

use tracing::debug;

use super::driver::{ElementHandle, PageDriver};
use super::error::RefError;
use super::refs::{parse_token, ElementDescriptor, RefCache};

pub struct RefResolver<'a> {
    cache: &'a RefCache,
}

impl<'a> RefResolver<'a> {
    pub fn new(cache: &'a RefCache) -> Self {
        Self { cache }
    }

    /// Validate the token and fetch its descriptor without touching the page.
    pub fn lookup(&self, token: &str) -> Result<&'a ElementDescriptor, RefError> {
        let key = parse_token(token)?;
        self.cache.get(key)
    }

    pub async fn resolve(
        &self,
        driver: &dyn PageDriver,
        token: &str,
    ) -> Result<ElementHandle, RefError> {
        let key = parse_token(token)?;
        let descriptor = self.cache.get(key)?;

        let handle = match descriptor {
            ElementDescriptor::Structural { selector, .. } => {
                debug!(ref_id = key, selector = %selector, "Resolving ref by selector");
                driver.resolve_by_selector(selector).await?
            }
            ElementDescriptor::Semantic { role, name, nth } => {
                debug!(ref_id = key, role = %role, name = ?name, nth = ?nth, "Resolving ref by role");
                let mut matches = driver.resolve_by_role(role, name.as_deref(), true).await?;
                let index = nth.unwrap_or(0);
                (index < matches.len()).then(|| matches.swap_remove(index))
            }
        };

        handle.ok_or_else(|| RefError::RefNotFound {
            ref_id: key.to_string(),
            available: self.cache.list_available(),
            stale: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fixture::{FixtureDriver, FixtureNode};
    use crate::browser::refs::RefTable;
    use crate::browser::snapshot::{SnapshotBuilder, SnapshotOptions};

    fn save_buttons() -> FixtureDriver {
        FixtureDriver::new(FixtureNode::new("RootWebArea").named("Editor").with_children(vec![
            FixtureNode::new("button").named("Save"),
            FixtureNode::new("button").named("Save"),
            FixtureNode::new("link").named("Help"),
            FixtureNode::new("button").named("Save"),
        ]))
    }

    async fn snapshot_into(driver: &FixtureDriver, cache: &mut RefCache, options: SnapshotOptions) {
        let snap = SnapshotBuilder::new(&options).build(driver).await.unwrap();
        cache.replace(snap.refs);
    }

    #[tokio::test]
    async fn test_format_rejection() {
        let driver = save_buttons();
        let mut cache = RefCache::new();
        snapshot_into(&driver, &mut cache, SnapshotOptions::default()).await;
        let resolver = RefResolver::new(&cache);

        for bad in ["ref1", "@1", "", "e"] {
            let err = resolver.resolve(&driver, bad).await.unwrap_err();
            assert_eq!(err.kind(), "invalid_ref_format", "token {:?}", bad);
        }

        let plain = resolver.resolve(&driver, "e1").await.unwrap();
        let at = resolver.resolve(&driver, "@e1").await.unwrap();
        assert_eq!(plain, at);
    }

    #[tokio::test]
    async fn test_ordinals_select_document_order() {
        let driver = save_buttons();
        let mut cache = RefCache::new();
        snapshot_into(&driver, &mut cache, SnapshotOptions { interactive: true, ..Default::default() }).await;
        let resolver = RefResolver::new(&cache);

        let all = driver.resolve_by_role("button", Some("Save"), true).await.unwrap();
        assert_eq!(all.len(), 3);

        // e1, e2, e4 are the Save buttons; e3 is the link.
        let picked: Vec<i64> = [
            resolver.resolve(&driver, "e1").await.unwrap().node,
            resolver.resolve(&driver, "e2").await.unwrap().node,
            resolver.resolve(&driver, "e4").await.unwrap().node,
        ]
        .to_vec();
        assert_eq!(picked, all.iter().map(|h| h.node).collect::<Vec<_>>());

        let nths: Vec<Option<usize>> = ["e1", "e2", "e4"]
            .iter()
            .map(|r| resolver.lookup(r).unwrap().nth())
            .collect();
        assert_eq!(nths, vec![Some(0), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_round_trip_semantic() {
        let driver = FixtureDriver::new(FixtureNode::new("RootWebArea").with_children(vec![
            FixtureNode::new("heading").named("Pricing"),
            FixtureNode::new("textbox").named("Email"),
            FixtureNode::new("link").named("Terms"),
        ]));
        let mut cache = RefCache::new();
        snapshot_into(&driver, &mut cache, SnapshotOptions::default()).await;
        let resolver = RefResolver::new(&cache);

        for id in cache.list_available() {
            let descriptor = resolver.lookup(&id).unwrap();
            let handle = resolver.resolve(&driver, &id).await.unwrap();
            assert_eq!(handle.role, descriptor.role());
            assert_eq!(handle.name.as_deref(), descriptor.name());
        }
    }

    #[tokio::test]
    async fn test_stale_ref_after_invalidation() {
        let driver = save_buttons();
        let mut cache = RefCache::new();
        snapshot_into(&driver, &mut cache, SnapshotOptions::default()).await;
        assert!(cache.is_valid("e1"));

        cache.invalidate();
        let err = RefResolver::new(&cache).resolve(&driver, "e1").await.unwrap_err();
        match err {
            RefError::RefNotFound { ref_id, available, .. } => {
                assert_eq!(ref_id, "e1");
                assert!(available.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cursor_element_resolves_by_selector() {
        let driver = FixtureDriver::new(FixtureNode::new("RootWebArea").with_children(vec![
            FixtureNode::new("generic")
                .named("Open details")
                .clickable("div.card:nth-of-type(1)"),
        ]));
        let mut cache = RefCache::new();
        snapshot_into(&driver, &mut cache, SnapshotOptions { cursor: true, ..Default::default() }).await;
        let resolver = RefResolver::new(&cache);

        let descriptor = resolver.lookup("e1").unwrap();
        assert_eq!(descriptor.role(), "clickable");
        assert_eq!(descriptor.selector(), Some("div.card:nth-of-type(1)"));

        let handle = resolver.resolve(&driver, "e1").await.unwrap();
        assert_eq!(driver.resolved_selectors(), vec!["div.card:nth-of-type(1)".to_string()]);
        assert_eq!(handle.name.as_deref(), Some("Open details"));
    }

    #[tokio::test]
    async fn test_vanished_element_reports_stale() {
        let driver = save_buttons();
        let mut cache = RefCache::new();
        cache.replace(
            [ElementDescriptor::Semantic {
                role: "button".into(),
                name: Some("Save".into()),
                nth: Some(7),
            }]
            .into_iter()
            .collect::<RefTable>(),
        );

        let err = RefResolver::new(&cache).resolve(&driver, "e1").await.unwrap_err();
        match err {
            RefError::RefNotFound { stale, available, .. } => {
                assert!(stale);
                assert_eq!(available, vec!["e1"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_name_match_is_exact() {
        let driver = FixtureDriver::new(FixtureNode::new("RootWebArea").with_children(vec![
            FixtureNode::new("button").named("Save draft"),
        ]));
        let mut cache = RefCache::new();
        cache.replace(
            [ElementDescriptor::Semantic {
                role: "button".into(),
                name: Some("Save".into()),
                nth: None,
            }]
            .into_iter()
            .collect::<RefTable>(),
        );
        let err = RefResolver::new(&cache).resolve(&driver, "e1").await.unwrap_err();
        assert_eq!(err.kind(), "ref_not_found");
    }
}
