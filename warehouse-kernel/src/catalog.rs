/**
 * PRODUCT CATALOG - Scan code -> display name, memoized
 *
 * ROLE : Narrow client of the inventory API (GET /products/qr/{code}) plus a static
 * fallback catalog, and the process-lifetime cache the video annotator goes through.
 * Only hits are cached: a miss is asked again next time, and displays the raw code.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid catalog base URL {0}")]
    BadBaseUrl(String),
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog answered {0}")]
    Status(StatusCode),
}

#[async_trait]
pub trait ProductLookup: Send + Sync {
    /// `Ok(None)` means the code is unknown upstream.
    async fn lookup_name_by_code(&self, code: &str) -> Result<Option<String>, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct ProductBody {
    name: String,
}

/// Inventory API client
pub struct HttpCatalog {
    client: reqwest::Client,
    base: Url,
}

impl HttpCatalog {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let base = Url::parse(base_url).map_err(|_| CatalogError::BadBaseUrl(base_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(CatalogError::BadBaseUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn product_url(&self, code: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["products", "qr", code]);
        }
        url
    }
}

#[async_trait]
impl ProductLookup for HttpCatalog {
    async fn lookup_name_by_code(&self, code: &str) -> Result<Option<String>, CatalogError> {
        let response = self.client.get(self.product_url(code)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<ProductBody>().await?.name)),
            StatusCode::NOT_FOUND => Ok(None),
            other => Err(CatalogError::Status(other)),
        }
    }
}

/// Fixed code -> name table from configuration
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    products: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn new(products: HashMap<String, String>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl ProductLookup for StaticCatalog {
    async fn lookup_name_by_code(&self, code: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.products.get(code).cloned())
    }
}

pub struct ProductNameCache {
    lookup: Arc<dyn ProductLookup>,
    names: Mutex<HashMap<String, String>>,
    /// One pending lookup per code; concurrent resolvers share its answer
    inflight: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

pub type SharedProductNameCache = Arc<ProductNameCache>;

impl ProductNameCache {
    pub fn new(lookup: Arc<dyn ProductLookup>) -> Self {
        Self {
            lookup,
            names: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Display name for `code`; the code itself when unknown or when the lookup fails.
    pub async fn resolve(&self, code: &str) -> String {
        let cached = self.names.lock().get(code).cloned();
        if let Some(name) = cached {
            return name;
        }

        let cell = self
            .inflight
            .lock()
            .entry(code.to_string())
            .or_default()
            .clone();
        let name = cell
            .get_or_init(|| self.fetch(code))
            .await
            .clone();

        let mut inflight = self.inflight.lock();
        if inflight.get(code).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            inflight.remove(code);
        }
        name
    }

    async fn fetch(&self, code: &str) -> String {
        match self.lookup.lookup_name_by_code(code).await {
            Ok(Some(name)) => {
                self.names.lock().insert(code.to_string(), name.clone());
                tracing::debug!(code, name = %name, "product name cached");
                name
            }
            Ok(None) => code.to_string(),
            Err(e) => {
                tracing::warn!(code, error = %e, "product lookup failed");
                code.to_string()
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<String> {
        self.names.lock().get(code).cloned()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.names.lock().contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn clear(&self) -> usize {
        let mut names = self.names.lock();
        let n = names.len();
        names.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; the table can be filled in after construction
    #[derive(Default)]
    struct CountingLookup {
        calls: AtomicUsize,
        table: Mutex<HashMap<String, String>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ProductLookup for CountingLookup {
        async fn lookup_name_by_code(&self, code: &str) -> Result<Option<String>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(CatalogError::Status(StatusCode::BAD_GATEWAY));
            }
            Ok(self.table.lock().get(code).cloned())
        }
    }

    #[tokio::test]
    async fn test_hit_is_looked_up_once() {
        let lookup = Arc::new(CountingLookup::default());
        lookup.table.lock().insert("QR-1".into(), "Widget-A".into());
        let cache = ProductNameCache::new(lookup.clone());

        assert_eq!(cache.resolve("QR-1").await, "Widget-A");
        assert_eq!(cache.resolve("QR-1").await, "Widget-A");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_miss_is_retried_and_later_insert_visible() {
        let lookup = Arc::new(CountingLookup::default());
        let cache = ProductNameCache::new(lookup.clone());

        assert_eq!(cache.resolve("QR-9").await, "QR-9");
        assert!(!cache.contains("QR-9"));

        lookup.table.lock().insert("QR-9".into(), "Pallet jack".into());
        assert_eq!(cache.resolve("QR-9").await, "Pallet jack");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("QR-9").as_deref(), Some("Pallet jack"));
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_lookup() {
        let lookup = Arc::new(CountingLookup {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        lookup.table.lock().insert("QR-1".into(), "Widget-A".into());
        let cache = ProductNameCache::new(lookup.clone());

        let (a, b) = tokio::join!(cache.resolve("QR-1"), cache.resolve("QR-1"));
        assert_eq!((a.as_str(), b.as_str()), ("Widget-A", "Widget-A"));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);

        // concurrent misses share one call too, and the next occurrence asks again
        let (a, b) = tokio::join!(cache.resolve("QR-2"), cache.resolve("QR-2"));
        assert_eq!((a.as_str(), b.as_str()), ("QR-2", "QR-2"));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.resolve("QR-2").await, "QR-2");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_lookup_falls_back_to_code() {
        let lookup = Arc::new(CountingLookup {
            fail: true,
            ..Default::default()
        });
        let cache = ProductNameCache::new(lookup);
        assert_eq!(cache.resolve("QR-1").await, "QR-1");
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_static_catalog_and_clear() {
        let cache = ProductNameCache::new(Arc::new(StaticCatalog::new(HashMap::from([(
            "QR-1".to_string(),
            "Widget-A".to_string(),
        )]))));
        assert_eq!(cache.resolve("QR-1").await, "Widget-A");
        assert_eq!(cache.clear(), 1);
        assert!(!cache.contains("QR-1"));
    }

    #[test]
    fn test_product_url_escapes_code() {
        let catalog = HttpCatalog::new("http://inventory:8000/api/", Duration::from_secs(2)).unwrap();
        assert_eq!(
            catalog.product_url("A/B 1").as_str(),
            "http://inventory:8000/api/products/qr/A%2FB%201"
        );
        assert!(HttpCatalog::new("not a url", Duration::from_secs(2)).is_err());
    }

    #[tokio::test]
    async fn test_http_catalog_against_local_api() {
        use axum::{extract::Path, http::StatusCode as AxStatus, routing::get, Json, Router};

        let app = Router::new().route(
            "/api/products/qr/{code}",
            get(|Path(code): Path<String>| async move {
                if code == "QR-1" {
                    Ok(Json(serde_json::json!({ "id": 1, "name": "Widget-A", "qr_code": code })))
                } else {
                    Err(AxStatus::NOT_FOUND)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let catalog = HttpCatalog::new(&format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();
        assert_eq!(
            catalog.lookup_name_by_code("QR-1").await.unwrap().as_deref(),
            Some("Widget-A")
        );
        assert_eq!(catalog.lookup_name_by_code("QR-404").await.unwrap(), None);
    }
}
