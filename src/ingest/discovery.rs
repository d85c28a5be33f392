//! Resource discovery: which remote resources exist right now.
//!
//! The catalog page embeds one JSON category tree per listed element. Categories
//! nest through `children`; every `services[].id` is a pollable resource.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;

use crate::error::DiscoveryError;
use crate::model::ResourceId;

pub type ResourceIds = BTreeSet<ResourceId>;

#[derive(Debug, Deserialize)]
struct CatalogCategory {
    #[serde(default)]
    title: String,
    #[serde(default)]
    services: Vec<CatalogService>,
    #[serde(default)]
    children: Vec<CatalogCategory>,
}

#[derive(Debug, Deserialize)]
struct CatalogService {
    id: u64,
}

/// Extract every service id from a catalog document.
pub fn parse_catalog(html: &str, selector: &str, attr: &str) -> Result<ResourceIds, DiscoveryError> {
    let sel = Selector::parse(selector).map_err(|e| DiscoveryError::Selector {
        selector: selector.to_string(),
        message: format!("{e:?}"),
    })?;
    let document = Html::parse_document(html);

    let mut ids = ResourceIds::new();
    let mut elements = 0usize;
    for element in document.select(&sel) {
        elements += 1;
        let raw = element.value().attr(attr).ok_or_else(|| {
            DiscoveryError::Malformed(format!("catalog element without `{attr}` attribute"))
        })?;
        let root: CatalogCategory = serde_json::from_str(raw)
            .map_err(|e| DiscoveryError::Malformed(format!("{e}: {raw}")))?;

        let mut stack = vec![root];
        while let Some(cat) = stack.pop() {
            debug!(
                target: "discovery",
                category = %cat.title,
                services = cat.services.len(),
                "catalog category"
            );
            ids.extend(cat.services.iter().map(|s| ResourceId(s.id)));
            stack.extend(cat.children);
        }
    }

    if elements == 0 {
        return Err(DiscoveryError::Empty);
    }
    Ok(ids)
}

/// Fetches the remote catalog page.
#[derive(Clone)]
pub struct CatalogDiscovery {
    client: Client,
    url: String,
    selector: String,
    attr: String,
}

impl CatalogDiscovery {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        selector: impl Into<String>,
        attr: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            selector: selector.into(),
            attr: attr.into(),
        }
    }

    pub async fn discover(&self) -> Result<ResourceIds, DiscoveryError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status(status.as_u16()));
        }
        let html = resp.text().await?;
        parse_catalog(&html, &self.selector, &self.attr)
    }
}

/// The current resource set. Each poll cycle takes one snapshot; a refresh swaps the
/// whole set at once.
#[derive(Debug, Default)]
pub struct ResourceSet {
    inner: Mutex<Arc<ResourceIds>>,
}

impl ResourceSet {
    pub fn new(ids: ResourceIds) -> Self {
        Self {
            inner: Mutex::new(Arc::new(ids)),
        }
    }

    pub fn snapshot(&self) -> Arc<ResourceIds> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, ids: ResourceIds) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(ids);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <ul>
            <li class="cat" data-catalog='{"title":"Physics","services":[{"id":101,"title":"Lab 1"}],
                "children":[{"title":"Defence","services":[{"id":102},{"id":103}],
                  "children":[{"title":"Deep","services":[{"id":104}]}]}]}'></li>
            <li class="cat" data-catalog='{"title":"Empty"}'></li>
            <li class="other">ignored</li>
          </ul>
        </body></html>
    "#;

    #[test]
    fn walks_nested_categories() {
        let ids = parse_catalog(PAGE, "[data-catalog]", "data-catalog").unwrap();
        let got: Vec<u64> = ids.iter().map(|r| r.0).collect();
        assert_eq!(got, vec![101, 102, 103, 104]);
    }

    #[test]
    fn page_without_catalog_is_an_error() {
        let err = parse_catalog("<html><p>maintenance</p></html>", "[data-catalog]", "data-catalog")
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Empty));
    }

    #[test]
    fn broken_json_is_an_error() {
        let html = r#"<div data-catalog='{"services":[{"id":"x"}]}'></div>"#;
        let err = parse_catalog(html, "[data-catalog]", "data-catalog").unwrap_err();
        assert!(matches!(err, DiscoveryError::Malformed(_)));
    }

    #[test]
    fn bad_selector_is_reported() {
        assert!(matches!(
            parse_catalog(PAGE, "[[nope", "data-catalog"),
            Err(DiscoveryError::Selector { .. })
        ));
    }

    #[test]
    fn replace_swaps_whole_set() {
        let set = ResourceSet::new([ResourceId(1), ResourceId(2)].into_iter().collect());
        let before = set.snapshot();
        set.replace([ResourceId(3)].into_iter().collect());
        assert_eq!(before.len(), 2);
        assert_eq!(set.snapshot().iter().next(), Some(&ResourceId(3)));
    }
}
