//! Public entry point: compile, cache, validate, execute, translate.
//!
//! ```text
//! evaluate(expression, data, options)
//!   -> cache lookup (raw expression text)
//!   -> template compile + tournament validate/transform (on miss)
//!   -> DataStore::register (fresh DataId, released on return)
//!   -> Bridge::execute
//!   -> RuntimeError -> ExpressionError
//! ```

pub mod cache;
pub mod errors;

pub use cache::{CompiledExpression, ExpressionCache};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use exprbox_types::bridge::{BridgeKind, BridgeState, EvaluateOptions, ExecuteRequest};
use exprbox_types::config::EvaluatorSettings;
use exprbox_types::data::WorkflowData;
use exprbox_types::error::{ErrorContext, ExpressionError, ExpressionErrorKind};
use exprbox_types::value::ExprValue;
use tokio::sync::RwLock;

use crate::bridge::{BoxBridge, BridgeFactory};
use crate::observability::{names, AttrValue, NoopObservability, ObservabilityProvider, SpanHandle};
use crate::template;
use crate::tournament::Tournament;

/// Everything an `Evaluator` is built from.
pub struct EvaluatorConfig {
    pub bridge: BoxBridge,
    /// Builds a replacement when the current bridge reports itself lost.
    pub bridge_factory: Option<BridgeFactory>,
    pub observability: Option<Arc<dyn ObservabilityProvider>>,
    /// Without one, every call behaves as if `skip_transform` were set.
    pub tournament: Option<Arc<dyn Tournament>>,
    pub settings: EvaluatorSettings,
}

impl EvaluatorConfig {
    pub fn new(bridge: BoxBridge) -> Self {
        Self {
            bridge,
            bridge_factory: None,
            observability: None,
            tournament: None,
            settings: EvaluatorSettings::default(),
        }
    }

    pub fn with_factory(mut self, factory: BridgeFactory) -> Self {
        self.bridge_factory = Some(factory);
        self
    }

    pub fn with_observability(mut self, provider: Arc<dyn ObservabilityProvider>) -> Self {
        self.observability = Some(provider);
        self
    }

    pub fn with_tournament(mut self, tournament: Arc<dyn Tournament>) -> Self {
        self.tournament = Some(tournament);
        self
    }

    pub fn with_settings(mut self, settings: EvaluatorSettings) -> Self {
        self.settings = settings;
        self
    }
}

pub struct Evaluator {
    bridge: RwLock<Arc<BoxBridge>>,
    factory: Option<BridgeFactory>,
    observability: Arc<dyn ObservabilityProvider>,
    tournament: Option<Arc<dyn Tournament>>,
    cache: Option<ExpressionCache>,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl Evaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        let cache = if config.settings.enable_cache {
            ExpressionCache::new(config.settings.max_cache_size)
        } else {
            None
        };
        Self {
            bridge: RwLock::new(Arc::new(config.bridge)),
            factory: config.bridge_factory,
            observability: config
                .observability
                .unwrap_or_else(|| Arc::new(NoopObservability)),
            tournament: config.tournament,
            cache,
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Start the owned bridge. Must complete before `evaluate`.
    pub async fn initialize(&self) -> Result<(), ExpressionError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(lifecycle_error("evaluator has been disposed"));
        }
        let bridge = self.current_bridge().await;
        bridge.initialize().await.map_err(|e| {
            tracing::error!(backend = %bridge.kind(), error = %e, "bridge failed to start");
            lifecycle_error(format!("bridge failed to start: {}", e.message))
        })?;
        self.initialized.store(true, Ordering::Release);
        tracing::debug!(backend = %bridge.kind(), "evaluator initialized");
        Ok(())
    }

    /// Evaluate `expression` against `data`.
    pub async fn evaluate(
        &self,
        expression: &str,
        data: impl Into<Arc<WorkflowData>>,
        options: &EvaluateOptions,
    ) -> Result<ExprValue, ExpressionError> {
        let data = data.into();
        let context = errors::context_for(expression, &data);

        if self.disposed.load(Ordering::Acquire) {
            return Err(ExpressionError::new(
                ExpressionErrorKind::Runtime,
                "evaluator has been disposed",
                context,
            ));
        }
        if !self.initialized.load(Ordering::Acquire) {
            return Err(ExpressionError::new(
                ExpressionErrorKind::Runtime,
                "evaluator is not initialized",
                context,
            ));
        }

        let started = Instant::now();
        let bridge = self.current_bridge().await;
        let mut attributes = vec![(names::ATTR_BACKEND, AttrValue::from(bridge.kind().as_str()))];
        if let Some(id) = &data.workflow_id {
            attributes.push((names::ATTR_WORKFLOW_ID, AttrValue::from(id.as_str())));
        }
        if let Some(node) = &data.node_name {
            attributes.push((names::ATTR_NODE_NAME, AttrValue::from(node.as_str())));
        }
        let mut span = self
            .observability
            .traces()
            .start_span(names::SPAN_EVALUATE, &attributes);

        let result = self
            .run(expression, data, options, &bridge, &context, span.as_mut())
            .await;

        let metrics = self.observability.metrics();
        let backend = bridge.kind().as_str();
        metrics.counter(names::EVALUATIONS, 1, &[("backend", backend)]);
        metrics.histogram(
            names::DURATION_MS,
            started.elapsed().as_secs_f64() * 1000.0,
            &[("backend", backend)],
        );

        match &result {
            Ok(_) => span.set_attribute(names::ATTR_OUTCOME, AttrValue::from("ok")),
            Err(err) => {
                let kind = err.kind().as_str();
                metrics.counter(names::ERRORS, 1, &[(names::LABEL_KIND, kind)]);
                span.set_attribute(names::ATTR_OUTCOME, AttrValue::from(kind));
                span.record_error(err.message());
                self.observability.logs().warn(
                    "expression evaluation failed",
                    &[("kind", kind), ("expression", expression)],
                );
                tracing::debug!(
                    kind = %err.kind(),
                    backend,
                    error = %err,
                    "expression evaluation failed"
                );
            }
        }
        span.end();
        result
    }

    async fn run(
        &self,
        expression: &str,
        data: Arc<WorkflowData>,
        options: &EvaluateOptions,
        bridge: &Arc<BoxBridge>,
        context: &ErrorContext,
        span: &mut dyn SpanHandle,
    ) -> Result<ExprValue, ExpressionError> {
        let use_transform = self.tournament.is_some() && !options.skip_transform;
        let cache = self.cache.as_ref().filter(|_| !options.skip_cache);
        let metrics = self.observability.metrics();

        let cached = cache.and_then(|c| c.get(expression, use_transform));
        span.set_attribute(names::ATTR_CACHE_HIT, AttrValue::from(cached.is_some()));
        let code = match cached {
            Some(hit) => {
                metrics.counter(names::CACHE_HIT, 1, &[]);
                hit.code.clone()
            }
            None => {
                if cache.is_some() {
                    metrics.counter(names::CACHE_MISS, 1, &[]);
                }
                let code = self.prepare(expression, use_transform, context)?;
                if let Some(cache) = cache {
                    if let Some(evicted) = cache.insert(
                        expression,
                        CompiledExpression {
                            code: code.clone(),
                            transformed: use_transform,
                        },
                    ) {
                        tracing::trace!(evicted = %evicted, "compiled expression evicted");
                    }
                    metrics.gauge(names::CACHE_SIZE, cache.len() as f64, &[]);
                }
                code
            }
        };

        let lease = bridge.data_store().register(data);
        let request = ExecuteRequest::new(code, lease.id()).with_timeout(options.timeout);
        let outcome = bridge.execute(request).await;
        drop(lease);

        match outcome {
            Ok(value) => Ok(value),
            Err(err) => {
                if bridge.is_disposed() && !self.disposed.load(Ordering::Acquire) {
                    self.reprovision(bridge).await;
                }
                Err(errors::translate(err, context.clone()))
            }
        }
    }

    /// Compile the template and, when enabled, validate and transform it.
    fn prepare(
        &self,
        expression: &str,
        use_transform: bool,
        context: &ErrorContext,
    ) -> Result<String, ExpressionError> {
        let compiled = template::compile(expression).map_err(|e| {
            ExpressionError::new(ExpressionErrorKind::Syntax, e.to_string(), context.clone())
        })?;

        let Some(tournament) = self.tournament.as_ref().filter(|_| use_transform) else {
            return Ok(compiled);
        };

        let validation = tournament.validate(&compiled);
        if !validation.valid {
            let message = if validation.errors.is_empty() {
                "expression rejected by validator".to_string()
            } else {
                validation.errors.join("; ")
            };
            return Err(ExpressionError::new(
                ExpressionErrorKind::SecurityViolation,
                message,
                context.clone(),
            ));
        }

        tournament.transform(&compiled).map_err(|e| {
            ExpressionError::new(ExpressionErrorKind::Syntax, e.to_string(), context.clone())
        })
    }

    /// Swap a lost bridge for a fresh one from the factory.
    async fn reprovision(&self, lost: &Arc<BoxBridge>) {
        let Some(factory) = &self.factory else {
            tracing::warn!(
                backend = %lost.kind(),
                "bridge was lost and no factory is configured; evaluator is unusable"
            );
            return;
        };

        let mut slot = self.bridge.write().await;
        if !Arc::ptr_eq(&slot, lost) {
            return;
        }
        let fresh = factory();
        match fresh.initialize().await {
            Ok(()) => {
                tracing::info!(backend = %fresh.kind(), "provisioned replacement bridge");
                self.observability.metrics().counter(
                    names::BRIDGE_REPROVISIONED,
                    1,
                    &[("backend", fresh.kind().as_str())],
                );
                *slot = Arc::new(fresh);
            }
            Err(e) => {
                tracing::error!(error = %e, "replacement bridge failed to start");
                self.observability
                    .logs()
                    .error("replacement bridge failed to start", &[("error", &e.message)]);
            }
        }
    }

    /// Tear down the owned bridge. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let bridge = self.current_bridge().await;
        bridge.dispose().await;
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        tracing::debug!("evaluator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub async fn bridge_kind(&self) -> BridgeKind {
        self.current_bridge().await.kind()
    }

    pub async fn bridge_state(&self) -> BridgeState {
        self.current_bridge().await.state()
    }

    /// Number of cached compiled expressions (zero when caching is off).
    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, ExpressionCache::len)
    }

    async fn current_bridge(&self) -> Arc<BoxBridge> {
        Arc::clone(&*self.bridge.read().await)
    }
}

fn lifecycle_error(message: impl Into<String>) -> ExpressionError {
    ExpressionError::new(
        ExpressionErrorKind::Runtime,
        message,
        ErrorContext::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use exprbox_types::bridge::BridgeCapabilities;
    use exprbox_types::data::DataPath;
    use exprbox_types::error::RuntimeError;
    use exprbox_types::value::FetchMode;
    use serde_json::json;

    use crate::bridge::{Bridge, StateCell};
    use crate::observability::{Labels, Logs, Metrics, Traces};
    use crate::store::{DataStore, RecordingListener};
    use crate::tournament::{PatternTournament, TournamentError, ValidationResult};

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    /// Echoes the code it receives after reading the `$json` root, or fails
    /// with a scripted error.
    struct MockBridge {
        store: Arc<DataStore>,
        state: StateCell,
        executions: Arc<AtomicUsize>,
        fail_with: Mutex<Option<RuntimeError>>,
        lose_on_failure: bool,
    }

    impl MockBridge {
        fn new(store: Arc<DataStore>) -> Self {
            Self {
                store,
                state: StateCell::new(),
                executions: Arc::new(AtomicUsize::new(0)),
                fail_with: Mutex::new(None),
                lose_on_failure: false,
            }
        }

        fn failing(store: Arc<DataStore>, err: RuntimeError, lose: bool) -> Self {
            let bridge = Self::new(store);
            *bridge.fail_with.lock().unwrap() = Some(err);
            Self {
                lose_on_failure: lose,
                ..bridge
            }
        }
    }

    impl Bridge for MockBridge {
        fn kind(&self) -> BridgeKind {
            BridgeKind::InProcess
        }

        fn capabilities(&self) -> BridgeCapabilities {
            BridgeCapabilities {
                synchronous_host_callback: true,
                hard_memory_limit: false,
                forceful_cancellation: false,
                survives_timeout: true,
            }
        }

        fn state(&self) -> BridgeState {
            self.state.get()
        }

        fn data_store(&self) -> &Arc<DataStore> {
            &self.store
        }

        async fn initialize(&self) -> Result<(), RuntimeError> {
            self.state.mark_ready()
        }

        async fn execute(&self, request: ExecuteRequest) -> Result<ExprValue, RuntimeError> {
            let guard = self.state.begin()?;
            self.executions.fetch_add(1, Ordering::SeqCst);
            self.store
                .get_data_sync(&request.data_id, &DataPath::json(), FetchMode::Shallow)?;
            let failure = self.fail_with.lock().unwrap().clone();
            match failure {
                Some(err) => {
                    if self.lose_on_failure {
                        guard.lost();
                    }
                    Err(err)
                }
                None => Ok(ExprValue::Json(json!(request.code))),
            }
        }

        async fn dispose(&self) {
            self.state.dispose();
        }
    }

    struct CountingTournament {
        inner: PatternTournament,
        transforms: AtomicUsize,
    }

    impl CountingTournament {
        fn new() -> Self {
            Self {
                inner: PatternTournament::new(4096).unwrap(),
                transforms: AtomicUsize::new(0),
            }
        }

        fn transforms(&self) -> usize {
            self.transforms.load(Ordering::SeqCst)
        }
    }

    impl Tournament for CountingTournament {
        fn validate(&self, code: &str) -> ValidationResult {
            self.inner.validate(code)
        }

        fn transform(&self, code: &str) -> Result<String, TournamentError> {
            self.transforms.fetch_add(1, Ordering::SeqCst);
            self.inner.transform(code)
        }
    }

    #[derive(Default)]
    struct RecordingObservability {
        counters: Mutex<HashMap<String, u64>>,
        spans: AtomicUsize,
    }

    impl RecordingObservability {
        fn counter_value(&self, key: &str) -> u64 {
            self.counters.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    struct CountingSpan;

    impl SpanHandle for CountingSpan {
        fn set_attribute(&mut self, _key: &str, _value: AttrValue) {}
        fn record_error(&mut self, _message: &str) {}
        fn end(self: Box<Self>) {}
    }

    impl Metrics for RecordingObservability {
        fn counter(&self, name: &str, value: u64, labels: Labels<'_>) {
            let key = match labels.iter().find(|(k, _)| *k == names::LABEL_KIND) {
                Some((_, kind)) => format!("{name}{{kind={kind}}}"),
                None => name.to_string(),
            };
            *self.counters.lock().unwrap().entry(key).or_default() += value;
        }
        fn gauge(&self, _name: &str, _value: f64, _labels: Labels<'_>) {}
        fn histogram(&self, _name: &str, _value: f64, _labels: Labels<'_>) {}
    }

    impl Traces for RecordingObservability {
        fn start_span(&self, _name: &str, _attributes: &[(&str, AttrValue)]) -> Box<dyn SpanHandle> {
            self.spans.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingSpan)
        }
    }

    impl Logs for RecordingObservability {
        fn error(&self, _message: &str, _fields: Labels<'_>) {}
        fn warn(&self, _message: &str, _fields: Labels<'_>) {}
        fn info(&self, _message: &str, _fields: Labels<'_>) {}
        fn debug(&self, _message: &str, _fields: Labels<'_>) {}
    }

    impl ObservabilityProvider for RecordingObservability {
        fn metrics(&self) -> &dyn Metrics {
            self
        }
        fn traces(&self) -> &dyn Traces {
            self
        }
        fn logs(&self) -> &dyn Logs {
            self
        }
    }

    fn data() -> WorkflowData {
        WorkflowData::new(json!({"email": "a@b.com"})).with_workflow("wf-1", "Signup")
    }

    async fn evaluator_with(config: EvaluatorConfig) -> Evaluator {
        let evaluator = Evaluator::new(config);
        evaluator.initialize().await.expect("initialize");
        evaluator
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn evaluate_executes_compiled_code_and_releases_context() {
        let store = Arc::new(DataStore::new());
        let evaluator =
            evaluator_with(EvaluatorConfig::new(BoxBridge::new(MockBridge::new(store.clone())))).await;

        let value = evaluator
            .evaluate("{{ $json.email }}", data(), &EvaluateOptions::default())
            .await
            .expect("evaluate");

        assert_eq!(value, ExprValue::Json(json!("(\n$json.email\n)")));
        assert!(store.is_empty(), "data context must not outlive the call");
    }

    #[tokio::test]
    async fn evaluate_before_initialize_is_rejected() {
        let evaluator = Evaluator::new(EvaluatorConfig::new(BoxBridge::new(MockBridge::new(
            Arc::new(DataStore::new()),
        ))));
        let err = evaluator
            .evaluate("{{ 1 }}", data(), &EvaluateOptions::default())
            .await
            .expect_err("not initialized");
        assert_eq!(err.kind(), ExpressionErrorKind::Runtime);
        assert_eq!(err.context().expression, "{{ 1 }}");
    }

    #[tokio::test]
    async fn lru_eviction_forces_retransform() {
        let tournament = Arc::new(CountingTournament::new());
        let evaluator = evaluator_with(
            EvaluatorConfig::new(BoxBridge::new(MockBridge::new(Arc::new(DataStore::new()))))
                .with_tournament(tournament.clone())
                .with_settings(EvaluatorSettings {
                    enable_cache: true,
                    max_cache_size: 2,
                }),
        )
        .await;
        let opts = EvaluateOptions::default();

        for expr in ["{{ 1 }}", "{{ 2 }}", "{{ 3 }}"] {
            evaluator.evaluate(expr, data(), &opts).await.expect("evaluate");
        }
        assert_eq!(tournament.transforms(), 3);

        evaluator.evaluate("{{ 2 }}", data(), &opts).await.expect("e2");
        evaluator.evaluate("{{ 3 }}", data(), &opts).await.expect("e3");
        assert_eq!(tournament.transforms(), 3, "E2 and E3 are still cached");

        evaluator.evaluate("{{ 1 }}", data(), &opts).await.expect("e1");
        assert_eq!(tournament.transforms(), 4, "E1 was evicted");
        assert_eq!(evaluator.cache_len(), 2);
    }

    #[tokio::test]
    async fn skip_cache_bypasses_lookup_and_write() {
        let tournament = Arc::new(CountingTournament::new());
        let evaluator = evaluator_with(
            EvaluatorConfig::new(BoxBridge::new(MockBridge::new(Arc::new(DataStore::new()))))
                .with_tournament(tournament.clone()),
        )
        .await;
        let opts = EvaluateOptions {
            skip_cache: true,
            ..EvaluateOptions::default()
        };

        evaluator.evaluate("{{ 1 }}", data(), &opts).await.expect("first");
        evaluator.evaluate("{{ 1 }}", data(), &opts).await.expect("second");
        assert_eq!(tournament.transforms(), 2);
        assert_eq!(evaluator.cache_len(), 0);
    }

    #[tokio::test]
    async fn skip_transform_entries_do_not_satisfy_transformed_lookups() {
        let tournament = Arc::new(CountingTournament::new());
        let evaluator = evaluator_with(
            EvaluatorConfig::new(BoxBridge::new(MockBridge::new(Arc::new(DataStore::new()))))
                .with_tournament(tournament.clone()),
        )
        .await;
        let trusted = EvaluateOptions {
            skip_transform: true,
            ..EvaluateOptions::default()
        };

        evaluator.evaluate("{{ 1 }}", data(), &trusted).await.expect("trusted");
        assert_eq!(tournament.transforms(), 0);

        evaluator
            .evaluate("{{ 1 }}", data(), &EvaluateOptions::default())
            .await
            .expect("untrusted");
        assert_eq!(tournament.transforms(), 1);
    }

    #[tokio::test]
    async fn missing_tournament_forces_skip_transform() {
        let store = Arc::new(DataStore::new());
        let evaluator =
            evaluator_with(EvaluatorConfig::new(BoxBridge::new(MockBridge::new(store)))).await;
        // Would be rejected by a validator; without one it reaches the bridge.
        let value = evaluator
            .evaluate("{{ eval }}", data(), &EvaluateOptions::default())
            .await
            .expect("no validator configured");
        assert!(value.as_json().is_some());
    }

    #[tokio::test]
    async fn rejected_expression_never_reaches_the_bridge() {
        let listener = Arc::new(RecordingListener::new());
        let store = Arc::new(DataStore::with_listener(listener.clone()));
        let bridge = MockBridge::new(store);
        let executions = Arc::clone(&bridge.executions);
        let evaluator = evaluator_with(
            EvaluatorConfig::new(BoxBridge::new(bridge))
                .with_tournament(Arc::new(CountingTournament::new())),
        )
        .await;

        let err = evaluator
            .evaluate("{{ this.constructor }}", data(), &EvaluateOptions::default())
            .await
            .expect_err("rejected");

        assert_eq!(err.kind(), ExpressionErrorKind::SecurityViolation);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert!(listener.reads().is_empty());
        assert_eq!(evaluator.cache_len(), 0, "failures are not cached");
    }

    #[tokio::test]
    async fn template_syntax_errors_are_reported_before_execution() {
        let bridge = MockBridge::new(Arc::new(DataStore::new()));
        let executions = Arc::clone(&bridge.executions);
        let evaluator = evaluator_with(EvaluatorConfig::new(BoxBridge::new(bridge))).await;

        let err = evaluator
            .evaluate("{{ $json.email", data(), &EvaluateOptions::default())
            .await
            .expect_err("unterminated");
        assert_eq!(err.kind(), ExpressionErrorKind::Syntax);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bridge_errors_are_translated_with_context() {
        let cases = [
            (RuntimeError::memory_limit("heap"), ExpressionErrorKind::MemoryLimit),
            (RuntimeError::timeout(5), ExpressionErrorKind::Timeout),
            (RuntimeError::security("eval"), ExpressionErrorKind::SecurityViolation),
            (RuntimeError::syntax("bad token"), ExpressionErrorKind::Syntax),
            (RuntimeError::runtime("boom"), ExpressionErrorKind::Runtime),
            (RuntimeError::internal("pipe closed"), ExpressionErrorKind::Runtime),
        ];
        for (runtime_err, kind) in cases {
            let bridge = MockBridge::failing(Arc::new(DataStore::new()), runtime_err.clone(), false);
            let evaluator = evaluator_with(EvaluatorConfig::new(BoxBridge::new(bridge))).await;
            let err = evaluator
                .evaluate("{{ $json.email }}", data(), &EvaluateOptions::default())
                .await
                .expect_err("scripted failure");
            assert_eq!(err.kind(), kind, "{}", runtime_err.code);
            assert_eq!(err.message(), runtime_err.message);
            assert_eq!(err.context().expression, "{{ $json.email }}");
            assert_eq!(err.context().workflow_id.as_deref(), Some("wf-1"));
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn dispose_is_terminal_and_idempotent() {
        let evaluator = evaluator_with(EvaluatorConfig::new(BoxBridge::new(MockBridge::new(
            Arc::new(DataStore::new()),
        ))))
        .await;

        evaluator.dispose().await;
        evaluator.dispose().await;
        assert!(evaluator.is_disposed());
        assert_eq!(evaluator.bridge_state().await, BridgeState::Disposed);

        let err = evaluator
            .evaluate("{{ 1 }}", data(), &EvaluateOptions::default())
            .await
            .expect_err("disposed");
        assert_eq!(err.kind(), ExpressionErrorKind::Runtime);
        assert!(evaluator.initialize().await.is_err());
    }

    #[tokio::test]
    async fn lost_bridge_is_replaced_from_factory() {
        let store = Arc::new(DataStore::new());
        let built = Arc::new(AtomicUsize::new(0));
        let factory: BridgeFactory = {
            let store = Arc::clone(&store);
            let built = Arc::clone(&built);
            Arc::new(move || {
                built.fetch_add(1, Ordering::SeqCst);
                BoxBridge::new(MockBridge::new(Arc::clone(&store)))
            })
        };
        let lost = MockBridge::failing(
            Arc::clone(&store),
            RuntimeError::timeout(10),
            true,
        );
        let evaluator = evaluator_with(
            EvaluatorConfig::new(BoxBridge::new(lost)).with_factory(factory),
        )
        .await;

        let err = evaluator
            .evaluate("{{ 1 }}", data(), &EvaluateOptions::default())
            .await
            .expect_err("timeout");
        assert_eq!(err.kind(), ExpressionErrorKind::Timeout);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(evaluator.bridge_state().await, BridgeState::Ready);

        evaluator
            .evaluate("{{ 1 }}", data(), &EvaluateOptions::default())
            .await
            .expect("replacement bridge works");
    }

    #[tokio::test]
    async fn lost_bridge_without_factory_rejects_deterministically() {
        let lost = MockBridge::failing(Arc::new(DataStore::new()), RuntimeError::timeout(10), true);
        let evaluator = evaluator_with(EvaluatorConfig::new(BoxBridge::new(lost))).await;

        evaluator
            .evaluate("{{ 1 }}", data(), &EvaluateOptions::default())
            .await
            .expect_err("timeout");
        let err = evaluator
            .evaluate("{{ 1 }}", data(), &EvaluateOptions::default())
            .await
            .expect_err("bridge disposed");
        assert_eq!(err.kind(), ExpressionErrorKind::Runtime);
        assert!(err.message().contains("disposed"));
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn reports_spans_cache_counters_and_error_kinds() {
        let obs = Arc::new(RecordingObservability::default());
        let evaluator = evaluator_with(
            EvaluatorConfig::new(BoxBridge::new(MockBridge::new(Arc::new(DataStore::new()))))
                .with_tournament(Arc::new(CountingTournament::new()))
                .with_observability(obs.clone()),
        )
        .await;
        let opts = EvaluateOptions::default();

        evaluator.evaluate("{{ 1 }}", data(), &opts).await.expect("miss");
        evaluator.evaluate("{{ 1 }}", data(), &opts).await.expect("hit");
        evaluator
            .evaluate("{{ eval('1') }}", data(), &opts)
            .await
            .expect_err("rejected");

        assert_eq!(obs.spans.load(Ordering::SeqCst), 3);
        assert_eq!(obs.counter_value(names::CACHE_MISS), 2);
        assert_eq!(obs.counter_value(names::CACHE_HIT), 1);
        assert_eq!(obs.counter_value(names::EVALUATIONS), 3);
        assert_eq!(
            obs.counter_value("expression.errors{kind=security_violation}"),
            1
        );
    }
}
