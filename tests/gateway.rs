use bytes::Bytes;
use imagegate::config::GatewayConfig;
use imagegate::delivery::{Delivery, DeliveryError, ResponseSink};
use imagegate::gateway::{Gateway, GatewayRequest, Outcome};
use imagegate::key::{EdgeKey, OriginKey};
use imagegate::source::SourceRef;
use imagegate::store::{ObjectHead, ObjectStore, PutObject, StoreError, StoredObject};
use imagegate::transform::params::{RawTransformQuery, TransformSpec};
use imagegate::transform::{Transform, TransformError, Transformed};
use imagegate::GatewayError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory store that records writes and can be told to fail.
#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    puts: Mutex<Vec<(String, PutObject)>>,
    fail_get: Option<StoreError>,
    fail_head: Option<StoreError>,
    fail_put: Option<StoreError>,
}

impl MemoryStore {
    fn with(key: &str, body: &'static [u8], content_type: &str) -> Self {
        let store = Self::default();
        store.insert(key, body, content_type);
        store
    }

    fn insert(&self, key: &str, body: &'static [u8], content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject::new(Bytes::from_static(body), Some(content_type.to_string())),
        );
    }

    fn put_keys(&self) -> Vec<String> {
        self.puts.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        if let Some(err) = &self.fail_get {
            return Err(err.clone());
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        if let Some(err) = &self.fail_head {
            return Err(err.clone());
        }
        Ok(self.objects.lock().unwrap().get(key).map(|o| ObjectHead {
            content_type: o.content_type.clone(),
            content_length: Some(o.body.len() as u64),
        }))
    }

    async fn put(&self, key: &str, object: PutObject) -> Result<(), StoreError> {
        self.puts.lock().unwrap().push((key.to_string(), object.clone()));
        if let Some(err) = &self.fail_put {
            return Err(err.clone());
        }
        let mut stored = StoredObject::new(object.body, Some(object.content_type));
        stored.cache_control = Some(object.cache_control);
        self.objects.lock().unwrap().insert(key.to_string(), stored);
        Ok(())
    }
}

/// Renders a textual description of the spec instead of pixels.
#[derive(Default)]
struct FakeTransformer {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait::async_trait]
impl Transform for FakeTransformer {
    async fn transform(&self, _source: Bytes, spec: &TransformSpec) -> Result<Transformed, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransformError::Decode("corrupt source".into()));
        }
        Ok(Transformed {
            body: Bytes::from(format!("{}x{}:{}", spec.width, spec.height, spec.format)),
            content_type: format!("image/{}", spec.format),
        })
    }
}

#[derive(Default)]
struct CollectingSink {
    deliveries: Mutex<Vec<Delivery>>,
    closed: bool,
}

impl CollectingSink {
    fn only(&self) -> Delivery {
        let deliveries = self.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 1, "expected exactly one delivery");
        deliveries[0].clone()
    }
}

#[async_trait::async_trait]
impl ResponseSink for CollectingSink {
    async fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        if self.closed {
            return Err(DeliveryError::Closed);
        }
        self.deliveries.lock().unwrap().push(delivery);
        Ok(())
    }
}

struct Harness {
    variants: Arc<MemoryStore>,
    sources: Arc<MemoryStore>,
    transformer: Arc<FakeTransformer>,
    gateway: Gateway,
}

fn harness_with(config: GatewayConfig, variants: MemoryStore, sources: MemoryStore, transformer: FakeTransformer) -> Harness {
    let variants = Arc::new(variants);
    let sources = Arc::new(sources);
    let transformer = Arc::new(transformer);
    let gateway = Gateway::new(
        Arc::new(config),
        variants.clone(),
        sources.clone(),
        transformer.clone(),
    );
    Harness { variants, sources, transformer, gateway }
}

fn harness() -> Harness {
    harness_with(
        GatewayConfig::default(),
        MemoryStore::default(),
        MemoryStore::with("photos/cat.jpg", b"jpeg-bytes", "image/jpeg"),
        FakeTransformer::default(),
    )
}

async fn run(h: &Harness, path: &str, query: &str, accept: Option<&str>) -> (Outcome, Delivery) {
    let sink = CollectingSink::default();
    let outcome = h.gateway.handle(&GatewayRequest::new(path, query, accept), &sink).await.unwrap();
    (outcome, sink.only())
}

fn expected_key(path: &str, query: &str, accept: Option<&str>) -> String {
    let source = SourceRef::parse(path).unwrap();
    let spec = TransformSpec::normalize(
        &RawTransformQuery::from_query(query),
        accept,
        &source.extension,
        &GatewayConfig::default().bounds,
    );
    OriginKey::encode(&source, &spec)
}

fn assert_error(delivery: &Delivery, want_status: u16, want_code: &str) {
    match delivery {
        Delivery::Error { status, code, .. } => {
            assert_eq!(*status, want_status);
            assert_eq!(code, want_code);
        }
        other => panic!("expected an error delivery, got {:?}", other),
    }
}

#[tokio::test]
async fn miss_transforms_stores_and_delivers() {
    let h = harness();
    let (outcome, delivery) = run(&h, "/photos/cat.jpg", "w=203", None).await;

    let key = expected_key("/photos/cat.jpg", "w=203", None);
    assert_eq!(outcome, Outcome::Generated { key: key.clone(), stored: true });
    assert_eq!(h.variants.put_keys(), vec![key.clone()]);
    assert_eq!(h.transformer.calls.load(Ordering::SeqCst), 1);

    let (_, put) = h.variants.puts.lock().unwrap()[0].clone();
    assert_eq!(put.content_type, "image/jpg");
    assert_eq!(put.cache_control, "max-age=31536000");
    assert_eq!(put.storage_class, "STANDARD");

    match delivery {
        Delivery::Object { object, etag } => {
            assert_eq!(object.body, Bytes::from_static(b"200x400:jpg"));
            assert_eq!(object.content_type.as_deref(), Some("image/jpg"));
            assert_eq!(object.cache_control.as_deref(), Some("max-age=31536000"));
            assert!(etag.is_some());
        }
        other => panic!("expected an object, got {:?}", other),
    }
}

#[tokio::test]
async fn hit_only_delivers() {
    let h = harness();
    run(&h, "/photos/cat.jpg", "w=200", None).await;
    let (outcome, delivery) = run(&h, "/photos/cat.jpg", "width=198", None).await;

    let key = expected_key("/photos/cat.jpg", "w=200", None);
    assert_eq!(outcome, Outcome::Hit { key });
    assert_eq!(h.transformer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.variants.put_keys().len(), 1);
    assert!(matches!(delivery, Delivery::Object { .. }));
}

#[tokio::test]
async fn webp_and_source_format_are_separate_variants() {
    let h = harness();
    let (plain, _) = run(&h, "/photos/cat.jpg", "", None).await;
    let (webp, delivery) = run(&h, "/photos/cat.jpg", "", Some("image/avif,image/webp,*/*")).await;
    assert!(matches!(plain, Outcome::Generated { .. }));
    assert!(matches!(webp, Outcome::Generated { .. }));
    assert_eq!(h.variants.put_keys().len(), 2);
    match delivery {
        Delivery::Object { object, .. } => assert_eq!(object.content_type.as_deref(), Some("image/webp")),
        other => panic!("expected an object, got {:?}", other),
    }
}

#[tokio::test]
async fn original_flag_bypasses_the_cache() {
    let h = harness();
    let (outcome, delivery) = run(&h, "/photos/cat.jpg", "o=true&w=300", None).await;

    assert_eq!(outcome, Outcome::Original);
    assert!(h.variants.put_keys().is_empty());
    assert_eq!(h.transformer.calls.load(Ordering::SeqCst), 0);
    match delivery {
        Delivery::Object { object, etag } => {
            assert_eq!(object.body, Bytes::from_static(b"jpeg-bytes"));
            assert_eq!(etag, None);
        }
        other => panic!("expected an object, got {:?}", other),
    }
}

#[tokio::test]
async fn non_image_sources_are_passed_through() {
    let h = harness();
    h.sources.insert("docs/notes.txt", b"hello", "text/plain");
    let (outcome, delivery) = run(&h, "/docs/notes.txt", "w=300", None).await;

    assert_eq!(outcome, Outcome::Original);
    assert_eq!(h.transformer.calls.load(Ordering::SeqCst), 0);
    assert!(h.variants.put_keys().is_empty());
    match delivery {
        Delivery::Object { object, .. } => assert_eq!(object.body, Bytes::from_static(b"hello")),
        other => panic!("expected an object, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_source_is_404() {
    let h = harness();
    let (outcome, delivery) = run(&h, "/photos/dog.jpg", "w=300", None).await;
    assert_eq!(outcome, Outcome::Failed { status: 404 });
    assert_error(&delivery, 404, "NoSuchKey");
    assert!(h.variants.put_keys().is_empty());
}

#[tokio::test]
async fn path_without_extension_is_fetched_as_is() {
    let h = harness();
    h.sources.insert("favicon", b"ico", "image/x-icon");
    let (outcome, _) = run(&h, "/favicon", "w=300", None).await;
    assert_eq!(outcome, Outcome::Original);

    let (outcome, delivery) = run(&h, "/robots", "", None).await;
    assert_eq!(outcome, Outcome::Failed { status: 404 });
    assert_error(&delivery, 404, "NoSuchKey");
}

#[tokio::test]
async fn forbidden_source_is_403() {
    let sources = MemoryStore {
        fail_head: Some(StoreError::Status { status: 403, message: "denied".into() }),
        ..MemoryStore::default()
    };
    let h = harness_with(GatewayConfig::default(), MemoryStore::default(), sources, FakeTransformer::default());
    let (outcome, delivery) = run(&h, "/photos/cat.jpg", "", None).await;
    assert_eq!(outcome, Outcome::Failed { status: 403 });
    assert_error(&delivery, 403, "AccessDenied");
}

#[tokio::test]
async fn transform_failure_is_500() {
    let h = harness_with(
        GatewayConfig::default(),
        MemoryStore::default(),
        MemoryStore::with("cat.png", b"png", "image/png"),
        FakeTransformer { fail: true, ..FakeTransformer::default() },
    );
    let (outcome, delivery) = run(&h, "/cat.png", "w=300", None).await;
    assert_eq!(outcome, Outcome::Failed { status: 500 });
    assert_error(&delivery, 500, "TransformFailed");
    assert!(h.variants.put_keys().is_empty());
}

#[tokio::test]
async fn cache_read_error_counts_as_miss() {
    let variants = MemoryStore {
        fail_get: Some(StoreError::Backend("disk on fire".into())),
        ..MemoryStore::default()
    };
    let h = harness_with(
        GatewayConfig::default(),
        variants,
        MemoryStore::with("photos/cat.jpg", b"jpeg-bytes", "image/jpeg"),
        FakeTransformer::default(),
    );
    let (outcome, delivery) = run(&h, "/photos/cat.jpg", "h=300", None).await;
    assert!(matches!(outcome, Outcome::Generated { stored: true, .. }));
    assert!(matches!(delivery, Delivery::Object { .. }));
}

#[tokio::test]
async fn cache_write_failure_still_delivers() {
    let variants = MemoryStore {
        fail_put: Some(StoreError::Io("read-only filesystem".into())),
        ..MemoryStore::default()
    };
    let h = harness_with(
        GatewayConfig::default(),
        variants,
        MemoryStore::with("photos/cat.jpg", b"jpeg-bytes", "image/jpeg"),
        FakeTransformer::default(),
    );
    let (outcome, delivery) = run(&h, "/photos/cat.jpg", "w=300", None).await;
    let key = expected_key("/photos/cat.jpg", "w=300", None);
    assert_eq!(outcome, Outcome::Generated { key: key.clone(), stored: false });
    // The write was attempted under the same key.
    assert_eq!(h.variants.put_keys(), vec![key]);
    assert!(matches!(delivery, Delivery::Object { .. }));
}

#[tokio::test]
async fn canonical_edge_path_is_its_own_key() {
    let h = harness();
    let path = "/photos/c/300x300/h/jpg/cat.jpg";
    let (outcome, delivery) = run(&h, path, "w=900", None).await;

    assert_eq!(
        outcome,
        Outcome::Generated { key: path.trim_start_matches('/').to_string(), stored: true }
    );
    match delivery {
        Delivery::Object { object, .. } => assert_eq!(object.body, Bytes::from_static(b"300x300:jpg")),
        other => panic!("expected an object, got {:?}", other),
    }

    let (source, spec) = EdgeKey::decode(path, &GatewayConfig::default().bounds).unwrap();
    assert_eq!(h.variants.put_keys(), vec![EdgeKey::encode(&source, &spec)]);

    // Transform parameters on a canonical path are ignored.
    let (outcome, _) = run(&h, path, "w=900&q=low", None).await;
    assert!(matches!(outcome, Outcome::Hit { .. }));

    // The original flag still bypasses the cache and serves the source.
    let (outcome, delivery) = run(&h, path, "o=true", None).await;
    assert_eq!(outcome, Outcome::Original);
    assert_eq!(h.transformer.calls.load(Ordering::SeqCst), 1);
    match delivery {
        Delivery::Object { object, etag } => {
            assert_eq!(object.body, Bytes::from_static(b"jpeg-bytes"));
            assert_eq!(etag, None);
        }
        other => panic!("expected an object, got {:?}", other),
    }
}

#[tokio::test]
async fn canonical_paths_can_be_disabled() {
    let config = GatewayConfig { accept_canonical_paths: false, ..GatewayConfig::default() };
    let h = harness_with(
        config,
        MemoryStore::default(),
        MemoryStore::with("photos/cat.jpg", b"jpeg-bytes", "image/jpeg"),
        FakeTransformer::default(),
    );
    let (outcome, _) = run(&h, "/photos/c/300x300/h/jpg/cat.jpg", "", None).await;
    assert_eq!(outcome, Outcome::Failed { status: 404 });
}

#[tokio::test]
async fn closed_sink_is_reported() {
    let h = harness();
    let sink = CollectingSink { closed: true, ..CollectingSink::default() };
    let result = h
        .gateway
        .handle(&GatewayRequest::new("/photos/cat.jpg", "w=300", None), &sink)
        .await;
    assert!(matches!(result, Err(GatewayError::DeliveryFailed(_))));
}
