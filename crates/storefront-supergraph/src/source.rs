//! Ownership and hot swap of the active supergraph.
//!
//! ```text
//! Uninitialized ──initialize()──▶ Initializing ──ok──▶ Ready ◀──┐
//!                                                       │       │ ok, or failure
//!                                                  reload()     │ recorded in
//!                                                       ▼       │ last_error
//!                                                   Reloading ──┘
//! ```
//!
//! The ability to swap the active supergraph only exists after the first
//! successful fetch. Failed fetches never replace the active supergraph.
//! One fetch runs at a time; a reload requested while another is running
//! fails with [`SupergraphError::ReloadInProgress`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::compose::{IntrospectAndCompose, STATIC_SOURCE};
use crate::descriptor::SupergraphDescriptor;
use crate::error::SupergraphError;
use crate::executor::{ExecutorFactory, QueryExecutor};
use crate::fetch::RegistryFetcher;

/// Upper bound on a single descriptor fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between static re-compositions in development.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How descriptors are acquired.
pub enum SourceMode {
    /// Compose from fixed subgraph endpoints; optionally re-poll.
    Static {
        composer: IntrospectAndCompose,
        poll_interval: Option<Duration>,
    },
    /// Fetch SDL text from a registry on demand.
    Dynamic { fetcher: RegistryFetcher },
}

impl SourceMode {
    /// Registry URL in dynamic mode.
    pub fn registry_url(&self) -> Option<&str> {
        match self {
            Self::Static { .. } => None,
            Self::Dynamic { fetcher } => Some(fetcher.url()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }
}

/// A descriptor together with the executor built from it.
///
/// Requests clone the `Arc` when they start, so a swap never affects an
/// operation already running.
pub struct ActiveSupergraph {
    pub descriptor: Arc<SupergraphDescriptor>,
    pub executor: Arc<dyn QueryExecutor>,
}

/// Lifecycle phase of a [`SupergraphSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePhase {
    Uninitialized,
    Initializing,
    Ready,
    Reloading,
}

/// Snapshot of reload bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadStatus {
    pub phase: SourcePhase,
    pub initialized: bool,
    pub last_reload_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub source_url: Option<String>,
}

#[derive(Debug, Default)]
struct ReloadState {
    last_reload_at: Option<OffsetDateTime>,
    last_error: Option<String>,
}

/// Capability to replace the active supergraph.
///
/// Created by the first successful fetch; every later swap goes through it.
struct SupergraphUpdater {
    active: Arc<ArcSwapOption<ActiveSupergraph>>,
    factory: Arc<dyn ExecutorFactory>,
}

impl SupergraphUpdater {
    fn update(&self, descriptor: SupergraphDescriptor) -> Result<(), SupergraphError> {
        let descriptor = Arc::new(descriptor);
        let executor = self.factory.build(&descriptor)?;
        self.active.store(Some(Arc::new(ActiveSupergraph {
            descriptor,
            executor,
        })));
        Ok(())
    }
}

/// Releases the single-flight flag when dropped, including on cancellation.
struct FetchGuard<'a>(&'a AtomicBool);

impl<'a> FetchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the active supergraph and its reload state.
pub struct SupergraphSource {
    mode: SourceMode,
    factory: Arc<dyn ExecutorFactory>,
    fetch_timeout: Duration,
    active: Arc<ArcSwapOption<ActiveSupergraph>>,
    updater: OnceLock<SupergraphUpdater>,
    state: RwLock<ReloadState>,
    fetching: AtomicBool,
}

impl SupergraphSource {
    pub fn new(mode: SourceMode, factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            mode,
            factory,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            active: Arc::new(ArcSwapOption::empty()),
            updater: OnceLock::new(),
            state: RwLock::new(ReloadState::default()),
            fetching: AtomicBool::new(false),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn mode(&self) -> &SourceMode {
        &self.mode
    }

    /// The supergraph new requests should use.
    pub fn current(&self) -> Option<Arc<ActiveSupergraph>> {
        self.active.load_full()
    }

    pub fn is_initialized(&self) -> bool {
        self.updater.get().is_some()
    }

    pub fn phase(&self) -> SourcePhase {
        match (self.is_initialized(), self.fetching.load(Ordering::Acquire)) {
            (false, false) => SourcePhase::Uninitialized,
            (false, true) => SourcePhase::Initializing,
            (true, false) => SourcePhase::Ready,
            (true, true) => SourcePhase::Reloading,
        }
    }

    pub fn status(&self) -> ReloadStatus {
        let state = self.state.read();
        ReloadStatus {
            phase: self.phase(),
            initialized: self.is_initialized(),
            last_reload_at: state.last_reload_at,
            last_error: state.last_error.clone(),
            source_url: self.mode.registry_url().map(str::to_string),
        }
    }

    /// Performs the first fetch and activates the result.
    ///
    /// Calling it again after success returns the active descriptor.
    pub async fn initialize(&self) -> Result<Arc<SupergraphDescriptor>, SupergraphError> {
        if let Some(active) = self.current() {
            return Ok(active.descriptor.clone());
        }

        let _guard =
            FetchGuard::acquire(&self.fetching).ok_or(SupergraphError::ReloadInProgress)?;
        tracing::info!(source = self.source_label(), "loading initial supergraph");

        let updater = SupergraphUpdater {
            active: self.active.clone(),
            factory: self.factory.clone(),
        };
        let descriptor = self.fetch_and_apply(&updater).await?;

        if self.updater.set(updater).is_err() {
            tracing::debug!("supergraph updater was already installed");
        }
        tracing::info!(source = descriptor.source_url(), "supergraph loaded");
        Ok(descriptor)
    }

    /// Fetches a new descriptor and swaps it in.
    ///
    /// On failure the active supergraph stays in force and the error is
    /// recorded in [`ReloadStatus::last_error`].
    pub async fn reload(&self) -> Result<Arc<SupergraphDescriptor>, SupergraphError> {
        let updater = self.updater.get().ok_or(SupergraphError::NotInitialized)?;
        let _guard =
            FetchGuard::acquire(&self.fetching).ok_or(SupergraphError::ReloadInProgress)?;

        tracing::info!(source = self.source_label(), "reloading supergraph");
        let descriptor = self.fetch_and_apply(updater).await?;
        tracing::info!("supergraph reloaded");
        Ok(descriptor)
    }

    /// Starts the development re-poll loop for static sources.
    ///
    /// Returns `None` when the source does not poll. The task stops once the
    /// source is dropped.
    pub fn spawn_polling(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let SourceMode::Static {
            poll_interval: Some(interval),
            ..
        } = self.mode
        else {
            return None;
        };

        let source: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(source) = source.upgrade() else {
                    break;
                };
                source.poll_once().await;
            }
        }))
    }

    /// One re-poll: swaps only when the document text changed.
    async fn poll_once(&self) {
        let Some(updater) = self.updater.get() else {
            return;
        };
        let Some(_guard) = FetchGuard::acquire(&self.fetching) else {
            tracing::debug!("skipping supergraph poll; fetch already running");
            return;
        };

        let descriptor = match self.fetch_descriptor().await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.record_failure(&e);
                return;
            }
        };

        let unchanged = self
            .current()
            .is_some_and(|active| active.descriptor.same_document(&descriptor));
        if unchanged {
            self.record_success();
            return;
        }

        match updater.update(descriptor) {
            Ok(()) => {
                self.record_success();
                tracing::info!("supergraph changed; new version activated");
            }
            Err(e) => self.record_failure(&e),
        }
    }

    async fn fetch_and_apply(
        &self,
        updater: &SupergraphUpdater,
    ) -> Result<Arc<SupergraphDescriptor>, SupergraphError> {
        let result = match self.fetch_descriptor().await {
            Ok(descriptor) => updater.update(descriptor),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.record_success();
                self.current()
                    .map(|active| active.descriptor.clone())
                    .ok_or(SupergraphError::NotInitialized)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn fetch_descriptor(&self) -> Result<SupergraphDescriptor, SupergraphError> {
        match &self.mode {
            SourceMode::Static { composer, .. } => {
                let sdl = self.bounded(composer.compose()).await?;
                Ok(SupergraphDescriptor::new(sdl, STATIC_SOURCE))
            }
            SourceMode::Dynamic { fetcher } => {
                let sdl = self.bounded(fetcher.fetch()).await?;
                Ok(SupergraphDescriptor::new(sdl, fetcher.url()))
            }
        }
    }

    /// Applies the fetch timeout. The inner future is dropped on expiry.
    async fn bounded<F>(&self, fetch: F) -> Result<String, SupergraphError>
    where
        F: Future<Output = Result<String, SupergraphError>>,
    {
        tokio::time::timeout(self.fetch_timeout, fetch)
            .await
            .map_err(|_| SupergraphError::Timeout(self.fetch_timeout))?
    }

    fn record_success(&self) {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write();
        state.last_reload_at = Some(state.last_reload_at.map_or(now, |last| last.max(now)));
        state.last_error = None;
    }

    fn record_failure(&self, error: &SupergraphError) {
        tracing::error!(error = %error, "supergraph fetch failed");
        self.state.write().last_error = Some(error.to_string());
    }

    fn source_label(&self) -> &str {
        self.mode.registry_url().unwrap_or(STATIC_SOURCE)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::datasource::OperationContext;
    use crate::operation::{GraphQLResponse, Operation};
    use crate::routing::SubgraphEndpoint;

    /// Executor that answers with the SDL it was built from.
    struct EchoExecutor(String);

    #[async_trait]
    impl QueryExecutor for EchoExecutor {
        async fn execute(&self, _: &Operation, _: &OperationContext) -> GraphQLResponse {
            GraphQLResponse::from_data(serde_json::Value::String(self.0.clone()))
        }
    }

    struct EchoFactory;

    impl ExecutorFactory for EchoFactory {
        fn build(
            &self,
            descriptor: &SupergraphDescriptor,
        ) -> Result<Arc<dyn QueryExecutor>, SupergraphError> {
            if descriptor.sdl().contains("invalid") {
                return Err(SupergraphError::InvalidSupergraph("invalid".into()));
            }
            Ok(Arc::new(EchoExecutor(descriptor.sdl().to_string())))
        }
    }

    fn dynamic(server: &MockServer) -> SupergraphSource {
        SupergraphSource::new(
            SourceMode::Dynamic {
                fetcher: RegistryFetcher::new(server.uri(), None, reqwest::Client::new()),
            },
            Arc::new(EchoFactory),
        )
    }

    async fn serve(server: &MockServer, body: &str) {
        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn active_sdl(source: &SupergraphSource) -> String {
        source.current().unwrap().descriptor.sdl().to_string()
    }

    #[tokio::test]
    async fn test_reload_before_initialize_is_not_initialized() {
        let server = MockServer::start().await;
        serve(&server, "v1").await;
        let source = dynamic(&server);

        assert_eq!(source.phase(), SourcePhase::Uninitialized);
        let err = source.reload().await.unwrap_err();

        assert!(matches!(err, SupergraphError::NotInitialized));
        assert!(source.current().is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_then_reload_swaps_descriptor() {
        let server = MockServer::start().await;
        serve(&server, "v1").await;
        let source = dynamic(&server);

        source.initialize().await.unwrap();
        assert_eq!(source.phase(), SourcePhase::Ready);
        assert_eq!(active_sdl(&source), "v1");
        let first = source.status().last_reload_at.unwrap();

        serve(&server, "v2").await;
        let descriptor = source.reload().await.unwrap();

        assert_eq!(descriptor.sdl(), "v2");
        assert_eq!(descriptor.source_url(), server.uri());
        assert_eq!(active_sdl(&source), "v2");
        let status = source.status();
        assert!(status.last_reload_at.unwrap() >= first);
        assert!(status.last_error.is_none());
        assert!(status.initialized);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_last_known_good() {
        let server = MockServer::start().await;
        serve(&server, "v1").await;
        let source = dynamic(&server);
        source.initialize().await.unwrap();
        let before = source.status().last_reload_at;

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source.reload().await.unwrap_err();
        assert!(matches!(err, SupergraphError::Status { status: 503, .. }));
        assert_eq!(active_sdl(&source), "v1");

        let status = source.status();
        assert_eq!(status.last_reload_at, before);
        assert!(status.last_error.unwrap().contains("503"));
        assert_eq!(source.phase(), SourcePhase::Ready);

        serve(&server, "v2").await;
        source.reload().await.unwrap();
        assert!(source.status().last_error.is_none());
    }

    #[tokio::test]
    async fn test_unbuildable_supergraph_is_not_activated() {
        let server = MockServer::start().await;
        serve(&server, "v1").await;
        let source = dynamic(&server);
        source.initialize().await.unwrap();

        serve(&server, "invalid").await;
        let err = source.reload().await.unwrap_err();

        assert!(matches!(err, SupergraphError::InvalidSupergraph(_)));
        assert_eq!(active_sdl(&source), "v1");
    }

    #[tokio::test]
    async fn test_fetch_timeout_keeps_previous_descriptor() {
        let server = MockServer::start().await;
        serve(&server, "v1").await;
        let source = dynamic(&server).with_fetch_timeout(Duration::from_millis(100));
        source.initialize().await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("v2")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let err = source.reload().await.unwrap_err();

        assert!(matches!(err, SupergraphError::Timeout(_)));
        assert_eq!(active_sdl(&source), "v1");
        assert!(source.status().last_error.unwrap().contains("timed out"));
        assert_eq!(source.phase(), SourcePhase::Ready);
    }

    #[tokio::test]
    async fn test_failed_initialize_records_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let source = dynamic(&server);

        assert!(source.initialize().await.is_err());
        assert!(!source.is_initialized());
        assert!(source.status().last_error.is_some());
        assert!(matches!(
            source.reload().await.unwrap_err(),
            SupergraphError::NotInitialized
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reload_is_rejected() {
        let server = MockServer::start().await;
        serve(&server, "v1").await;
        let source = dynamic(&server);
        source.initialize().await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("v2")
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let (first, second) = tokio::join!(source.reload(), source.reload());

        assert_eq!(first.unwrap().sdl(), "v2");
        assert!(matches!(second, Err(SupergraphError::ReloadInProgress)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inflight_operation_keeps_its_executor() {
        let server = MockServer::start().await;
        serve(&server, "v1").await;
        let source = dynamic(&server);
        source.initialize().await.unwrap();

        let pinned = source.current().unwrap();
        serve(&server, "v2").await;
        source.reload().await.unwrap();

        let operation = Operation::parse(crate::operation::GraphQLRequest::new("{ a }")).unwrap();
        let old = pinned
            .executor
            .execute(&operation, &OperationContext::default())
            .await;
        assert_eq!(old.data, Some(serde_json::json!("v1")));
        assert_eq!(active_sdl(&source), "v2");
    }

    #[tokio::test]
    async fn test_static_polling_swaps_only_on_change() {
        let server = MockServer::start().await;
        let sdl = |field: &str| {
            let sdl = format!("type Query {{ {field}: Int }}");
            serde_json::json!({"data": {"_service": {"sdl": sdl}}})
        };
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sdl("a")))
            .mount(&server)
            .await;

        let source = Arc::new(SupergraphSource::new(
            SourceMode::Static {
                composer: IntrospectAndCompose::new(
                    vec![SubgraphEndpoint::new("products", server.uri())],
                    reqwest::Client::new(),
                ),
                poll_interval: Some(Duration::from_millis(50)),
            },
            Arc::new(EchoFactory),
        ));
        source.initialize().await.unwrap();
        let first = source.current().unwrap();
        let handle = source.spawn_polling().unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(Arc::ptr_eq(&first, &source.current().unwrap()));

        server.reset().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sdl("b")))
            .mount(&server)
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(active_sdl(&source).contains("b: Int"));
        assert!(source.status().source_url.is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn test_dynamic_source_does_not_poll() {
        let server = MockServer::start().await;
        let source = Arc::new(dynamic(&server));
        assert!(source.spawn_polling().is_none());
    }
}
