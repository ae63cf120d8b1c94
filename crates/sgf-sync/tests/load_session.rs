use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sgf_catalog::{sample_transport, CatalogRegistry};
use sgf_core::SourceId;
use sgf_fetch::{proxied_url, AttemptError, FixtureTransport, Transport, DEFAULT_PROXIES};
use sgf_sync::{Availability, CatalogLoader, DatasetOutcome, LoadStatus, Session, TOTAL_FAILURE_MESSAGE};
use tokio::sync::Semaphore;

fn registry_without_proxies() -> CatalogRegistry {
    CatalogRegistry::from_yaml_str("proxies: []\n").unwrap()
}

fn csv_with_product(product: &str) -> String {
    format!("Categoria,Producto,Empresa\nBebidas,{product},Watt's\n")
}

#[tokio::test]
async fn partial_failure_keeps_the_loaded_catalog() {
    let registry = CatalogRegistry::default();
    let coacel_url = registry.url_for(SourceId::Coacel).unwrap().to_string();
    let transport = sample_transport(&registry).unwrap().with_status(coacel_url, 500);
    let loader = CatalogLoader::new(registry, Arc::new(transport.clone()));

    let mut session = Session::new(Arc::new(loader));
    let state = session.load().await.clone();

    assert_eq!(state.status, LoadStatus::Ready);
    let view = state.view();
    assert_eq!(view.total, 10);
    assert!(view.error.is_none());
    assert!(view.results.iter().all(|r| r.source == SourceId::Convivir));

    let coacel = &view.toggles[0];
    assert!(!coacel.enabled);
    assert!(matches!(coacel.availability, Availability::Unavailable { .. }));
    assert!(view.toggles[1].enabled);

    // direct plus three proxies for the failing dataset, one hit for the other
    assert_eq!(transport.requested().len(), 5);
}

#[tokio::test]
async fn proxy_fallback_delivers_the_dataset() {
    let registry = CatalogRegistry::default();
    let url = registry.url_for(SourceId::Coacel).unwrap().to_string();
    let transport = FixtureTransport::new()
        .with_status(url.clone(), 503)
        .with_body(proxied_url(DEFAULT_PROXIES[0], &url), csv_with_product("Pan"));
    let loader = CatalogLoader::new(registry, Arc::new(transport));

    match loader.load_source(SourceId::Coacel).await {
        DatasetOutcome::Loaded { entries, .. } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].product, "Pan");
        }
        other => panic!("expected loaded dataset, got {other:?}"),
    }
}

#[tokio::test]
async fn total_failure_reports_error_and_allows_retry() {
    let loader = CatalogLoader::new(registry_without_proxies(), Arc::new(FixtureTransport::new()));
    let mut session = Session::new(Arc::new(loader));
    let view = session.load().await.view();

    assert_eq!(view.error.as_deref(), Some(TOTAL_FAILURE_MESSAGE));
    assert!(view.can_retry);
    assert_eq!(view.total, 0);
    assert!(view.toggles.iter().all(|t| !t.enabled));
    assert!(view.category_options.is_empty());
}

struct Flaky {
    online: AtomicBool,
}

#[async_trait]
impl Transport for Flaky {
    async fn get_text(&self, _url: &str) -> Result<String, AttemptError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(csv_with_product("Jugo"))
        } else {
            Err(AttemptError::Unreachable("offline".to_string()))
        }
    }
}

#[tokio::test]
async fn retry_after_total_failure_clears_the_error() {
    let transport = Arc::new(Flaky {
        online: AtomicBool::new(false),
    });
    let loader = CatalogLoader::new(registry_without_proxies(), transport.clone());
    let mut session = Session::new(Arc::new(loader));

    assert!(session.load().await.error().is_some());

    transport.online.store(true, Ordering::SeqCst);
    let state = session.load().await;
    assert!(state.error().is_none());
    assert_eq!(state.generation, 2);
    assert_eq!(state.view().total, 2);
}

/// First two requests block on `gate` and serve "old"; later ones serve "new".
struct Gated {
    calls: AtomicUsize,
    gate: Arc<Semaphore>,
    arrived: Arc<Semaphore>,
}

#[async_trait]
impl Transport for Gated {
    async fn get_text(&self, _url: &str) -> Result<String, AttemptError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
            self.arrived.add_permits(1);
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|err| AttemptError::Unreachable(err.to_string()))?;
            Ok(csv_with_product("old"))
        } else {
            Ok(csv_with_product("new"))
        }
    }
}

#[tokio::test]
async fn stale_load_never_overwrites_newer_results() {
    let gate = Arc::new(Semaphore::new(0));
    let arrived = Arc::new(Semaphore::new(0));
    let transport = Arc::new(Gated {
        calls: AtomicUsize::new(0),
        gate: gate.clone(),
        arrived: arrived.clone(),
    });
    let loader = CatalogLoader::new(registry_without_proxies(), transport);
    let mut session = Session::new(Arc::new(loader));

    let first = session.reload();
    arrived.acquire_many(2).await.unwrap().forget();
    let second = session.reload();
    assert_eq!(session.in_flight(), 2);

    assert_eq!(session.next_report().await, Some(true));
    let products = |session: &Session| {
        session
            .state()
            .view()
            .results
            .into_iter()
            .map(|r| r.product)
            .collect::<Vec<_>>()
    };
    assert_eq!(products(&session), vec!["new", "new"]);

    gate.add_permits(2);
    assert_eq!(session.next_report().await, Some(false));
    assert_eq!(products(&session), vec!["new", "new"]);
    assert_eq!(session.state().generation, 2);

    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(session.next_report().await, None);
}

struct Exploding;

#[async_trait]
impl Transport for Exploding {
    async fn get_text(&self, url: &str) -> Result<String, AttemptError> {
        panic!("transport blew up on {url}");
    }
}

#[tokio::test]
async fn panicking_load_task_still_settles() {
    let loader = CatalogLoader::new(registry_without_proxies(), Arc::new(Exploding));
    let mut session = Session::new(Arc::new(loader));

    let handle = session.reload();
    assert_eq!(session.next_report().await, Some(true));
    assert!(handle.await.is_err());
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.state().error(), Some(TOTAL_FAILURE_MESSAGE));
    assert_eq!(session.next_report().await, None);
}
