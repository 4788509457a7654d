//! `JsIsolate`: one hardened JavaScript context.
//!
//! Every bridge backend runs expressions through this type. It is `!Send`
//! (the engine's GC is single-threaded), so backends own an isolate on a
//! dedicated thread and talk to it over channels.

mod builtins;
mod globals;
mod lazy;
mod prelude;
mod scope;

pub use builtins::HELPER_GLOBALS;
pub use globals::PARAMS;
pub use prelude::ALLOWED_GLOBALS;
pub use scope::{CallScope, DataAccess, FaultSlot};

use std::num::NonZeroUsize;
use std::rc::Rc;

use boa_engine::error::JsNativeErrorKind;
use boa_engine::{Context, JsError, JsObject, JsString, JsValue, Source};
use exprbox_types::config::BridgeConfig;
use exprbox_types::data::ExecutionMeta;
use exprbox_types::error::RuntimeError;
use exprbox_types::value::ExprValue;
use lru::LruCache;

/// Compiled wrapper functions kept per isolate.
const COMPILED_CAPACITY: usize = 256;

pub struct JsIsolate {
    context: Context,
    config: BridgeConfig,
    fault: FaultSlot,
    /// Captured before hardening removes `Function` from the global object.
    function_ctor: JsObject,
    stringify: JsObject,
    compiled: LruCache<String, JsObject>,
}

impl JsIsolate {
    /// Build a fresh, hardened context with the helper libraries installed.
    pub fn new(config: &BridgeConfig) -> Result<Self, RuntimeError> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(config.max_loop_iterations);
        context
            .runtime_limits_mut()
            .set_recursion_limit(config.max_recursion_depth);

        builtins::register_all(&mut context, config.debug).map_err(setup_error)?;
        let function_ctor = capture(&mut context, "Function")?;
        let stringify = capture(&mut context, "JSON.stringify")?;

        let fault = FaultSlot::default();
        prelude::harden(&mut context, &fault).map_err(setup_error)?;

        let capacity = NonZeroUsize::new(COMPILED_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            context,
            config: config.clone(),
            fault,
            function_ctor,
            stringify,
            compiled: LruCache::new(capacity),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run one compiled expression against the data behind `access`.
    ///
    /// Failures never carry engine stack traces; a host-side fault raised
    /// during the call takes precedence over whatever the script did with
    /// the exception.
    pub fn evaluate(
        &mut self,
        code: &str,
        meta: &ExecutionMeta,
        access: Rc<dyn DataAccess>,
    ) -> Result<ExprValue, RuntimeError> {
        if code.len() > self.config.max_code_length {
            return Err(RuntimeError::security(format!(
                "code length {} exceeds the limit of {}",
                code.len(),
                self.config.max_code_length
            )));
        }
        self.fault.clear();

        let function = self.compile(code)?;
        let scope = Rc::new(CallScope::new(access, self.fault.clone()));
        let outcome = self.call(&function, meta, &scope);

        if let Some(fault) = self.fault.take() {
            return Err(fault);
        }
        match outcome {
            Ok(None) => Ok(ExprValue::Undefined),
            Ok(Some(text)) => self.decode(&text),
            Err(err) => Err(self.classify(err)),
        }
    }

    fn compile(&mut self, code: &str) -> Result<JsObject, RuntimeError> {
        if let Some(function) = self.compiled.get(code) {
            return Ok(function.clone());
        }
        // The dynamic-function path parses the body on its own, so the
        // expression cannot close the wrapper early.
        let body = format!("\"use strict\";\nreturn (\n{code}\n);");
        let args: Vec<JsValue> = PARAMS
            .iter()
            .map(|name| JsValue::from(JsString::from(*name)))
            .chain(std::iter::once(JsValue::from(JsString::from(body))))
            .collect();
        let compiled = self
            .function_ctor
            .call(&JsValue::undefined(), &args, &mut self.context);
        let value = match compiled {
            Ok(value) => value,
            Err(err) => {
                self.fault.clear();
                return Err(self.classify(err));
            }
        };
        let function = value
            .as_callable()
            .cloned()
            .ok_or_else(|| RuntimeError::syntax("expression did not compile to a function"))?;
        self.compiled.put(code.to_string(), function.clone());
        Ok(function)
    }

    fn call(
        &mut self,
        function: &JsObject,
        meta: &ExecutionMeta,
        scope: &Rc<CallScope>,
    ) -> Result<Option<String>, JsError> {
        let args = globals::arguments(meta, scope, &mut self.context)?;
        let value = function.call(&JsValue::undefined(), &args, &mut self.context)?;
        if value.is_undefined() {
            return Ok(None);
        }
        let text = self
            .stringify
            .call(&JsValue::undefined(), &[value], &mut self.context)?;
        Ok(text.as_string().map(JsString::to_std_string_escaped))
    }

    fn decode(&self, text: &str) -> Result<ExprValue, RuntimeError> {
        if text.len() > self.config.max_output_bytes {
            return Err(RuntimeError::memory_limit(format!(
                "result of {} bytes exceeds the limit of {}",
                text.len(),
                self.config.max_output_bytes
            )));
        }
        serde_json::from_str(text)
            .map(ExprValue::Json)
            .map_err(|e| RuntimeError::internal(format!("result is not valid JSON: {e}")))
    }

    fn classify(&mut self, err: JsError) -> RuntimeError {
        if self.config.debug {
            tracing::debug!(target: "exprbox::isolate", error = %err, "script raised");
        }
        match err.try_native(&mut self.context) {
            Ok(native) => {
                let message = native.to_string();
                match native.kind {
                    JsNativeErrorKind::Syntax => RuntimeError::syntax(message),
                    JsNativeErrorKind::RuntimeLimit
                        if message.to_ascii_lowercase().contains("loop") =>
                    {
                        RuntimeError::timeout(self.config.timeout_ms).with_details(
                            serde_json::json!({ "max_loop_iterations": self.config.max_loop_iterations }),
                        )
                    }
                    _ => RuntimeError::runtime(message),
                }
            }
            Err(_) => {
                let thrown = err
                    .as_opaque()
                    .map(|value| value.display().to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                RuntimeError::runtime(format!("Uncaught {thrown}"))
            }
        }
    }
}

fn capture(context: &mut Context, expression: &str) -> Result<JsObject, RuntimeError> {
    let value = context
        .eval(Source::from_bytes(expression))
        .map_err(setup_error)?;
    value
        .as_callable()
        .cloned()
        .ok_or_else(|| RuntimeError::internal(format!("`{expression}` is not callable")))
}

fn setup_error(err: JsError) -> RuntimeError {
    RuntimeError::internal(format!("isolate setup failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use exprbox_core::store::DataStore;
    use exprbox_core::store::RecordingListener;
    use exprbox_types::data::{DataId, DataPath, WorkflowData};
    use exprbox_types::error::RuntimeErrorCode;
    use exprbox_types::value::{FetchMode, LazyValue};
    use serde_json::json;
    use std::sync::Arc;

    struct StoreReads {
        store: Arc<DataStore>,
        id: DataId,
    }

    impl DataAccess for StoreReads {
        fn fetch(&self, path: &DataPath, mode: FetchMode) -> Result<LazyValue, RuntimeError> {
            self.store.get_data_sync(&self.id, path, mode)
        }
    }

    struct Fixture {
        isolate: JsIsolate,
        store: Arc<DataStore>,
        listener: Arc<RecordingListener>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(BridgeConfig::default())
        }

        fn with_config(config: BridgeConfig) -> Self {
            let listener = Arc::new(RecordingListener::new());
            let store = Arc::new(DataStore::with_listener(listener.clone()));
            Self {
                isolate: JsIsolate::new(&config).expect("isolate"),
                store,
                listener,
            }
        }

        fn eval(&mut self, code: &str, data: WorkflowData) -> Result<ExprValue, RuntimeError> {
            let data = Arc::new(data);
            let meta = data.meta();
            let lease = self.store.register(data);
            let access = Rc::new(StoreReads {
                store: Arc::clone(&self.store),
                id: lease.id(),
            });
            self.isolate.evaluate(code, &meta, access)
        }
    }

    fn user_data() -> WorkflowData {
        WorkflowData::new(json!({
            "user": {"email": "ada@example.com", "name": "Ada"},
            "a": {"b": 1, "c": {"huge": [1, 2, 3]}},
            "items": [10, 20, 30]
        }))
    }

    #[test]
    fn evaluates_plain_expressions() {
        let mut f = Fixture::new();
        assert_eq!(
            f.eval("1 + 2", WorkflowData::default()).unwrap(),
            ExprValue::Json(json!(3))
        );
        assert_eq!(
            f.eval("'a' + 'b'", WorkflowData::default()).unwrap(),
            ExprValue::Json(json!("ab"))
        );
    }

    #[test]
    fn reads_nested_json_lazily() {
        let mut f = Fixture::new();
        let result = f.eval("$json.a.b", user_data()).unwrap();
        assert_eq!(result, ExprValue::Json(json!(1)));

        let paths = f.listener.paths();
        assert!(paths.contains(&"a.b".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with("a.c")));
        assert!(!paths.iter().any(|p| p.starts_with("user")));
    }

    #[test]
    fn repeated_reads_fetch_once() {
        let mut f = Fixture::new();
        f.eval("$json.user.email + $json.user.email", user_data())
            .unwrap();
        let email_reads = f
            .listener
            .paths()
            .iter()
            .filter(|p| p.as_str() == "user.email")
            .count();
        assert_eq!(email_reads, 1);
    }

    #[test]
    fn missing_paths_are_undefined() {
        let mut f = Fixture::new();
        assert_eq!(
            f.eval("$json.missing", user_data()).unwrap(),
            ExprValue::Undefined
        );
        assert_eq!(
            f.eval("$json.missing === undefined", user_data()).unwrap(),
            ExprValue::Json(json!(true))
        );
    }

    #[test]
    fn email_lookup_with_string_methods() {
        let mut f = Fixture::new();
        let result = f
            .eval("$json.user.email.split('@')[1].toUpperCase()", user_data())
            .unwrap();
        assert_eq!(result, ExprValue::Json(json!("EXAMPLE.COM")));
    }

    #[test]
    fn returned_objects_are_materialized() {
        let mut f = Fixture::new();
        let result = f.eval("$json.user", user_data()).unwrap();
        assert_eq!(
            result,
            ExprValue::Json(json!({"email": "ada@example.com", "name": "Ada"}))
        );
        let result = f.eval("$json.items.map(x => x * 2)", user_data()).unwrap();
        assert_eq!(result, ExprValue::Json(json!([20, 40, 60])));
    }

    #[test]
    fn input_and_node_accessors() {
        let mut f = Fixture::new();
        let data = WorkflowData::new(json!({}))
            .with_items(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})], 1)
            .with_node_output("Fetch Users", vec![json!({"name": "Ada"})]);

        assert_eq!(
            f.eval("$input.item.json.id", data.clone()).unwrap(),
            ExprValue::Json(json!(2))
        );
        assert_eq!(
            f.eval("$input.first().json.id + $input.last().json.id", data.clone())
                .unwrap(),
            ExprValue::Json(json!(4))
        );
        assert_eq!(
            f.eval("$input.all().length", data.clone()).unwrap(),
            ExprValue::Json(json!(3))
        );
        assert_eq!(
            f.eval("$item(2).$json.id", data.clone()).unwrap(),
            ExprValue::Json(json!(3))
        );
        assert_eq!(
            f.eval("$item(0, 5)", data.clone()).unwrap(),
            ExprValue::Undefined
        );
        assert_eq!(
            f.eval("$('Fetch Users').first().json.name", data.clone())
                .unwrap(),
            ExprValue::Json(json!("Ada"))
        );
        let err = f.eval("$('Nope').first()", data).unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::Runtime);
        assert!(err.message.contains("Nope"));
    }

    #[test]
    fn metadata_globals() {
        let mut f = Fixture::new();
        let data = WorkflowData::new(json!({}))
            .with_workflow("wf-1", "Billing")
            .with_node("Set")
            .with_execution("exec-9");
        assert_eq!(
            f.eval(
                "[$workflow.id, $workflow.name, $node.name, $execution.id, $runIndex, $itemIndex]",
                data
            )
            .unwrap(),
            ExprValue::Json(json!(["wf-1", "Billing", "Set", "exec-9", 0, 0]))
        );
        assert_eq!(
            f.eval("typeof $now === 'string' && $today.endsWith('T00:00:00+00:00')", WorkflowData::default())
                .unwrap(),
            ExprValue::Json(json!(true))
        );
    }

    #[test]
    fn helper_libraries_are_available() {
        let mut f = Fixture::new();
        assert_eq!(
            f.eval("crypto.sha256('abc')", WorkflowData::default())
                .unwrap(),
            ExprValue::Json(json!(
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            ))
        );
        assert_eq!(
            f.eval("atob(btoa('hello'))", WorkflowData::default())
                .unwrap(),
            ExprValue::Json(json!("hello"))
        );
        assert_eq!(
            f.eval("uuid().length", WorkflowData::default()).unwrap(),
            ExprValue::Json(json!(36))
        );
        assert_eq!(
            f.eval("console.log('x')", WorkflowData::default()).unwrap(),
            ExprValue::Undefined
        );
    }

    #[test]
    fn code_generation_is_trapped() {
        let mut f = Fixture::new();
        for code in [
            "eval('1')",
            "Function('return 1')()",
            "(() => 1).constructor('return 1')()",
            "(function* () {}).constructor",
        ] {
            let err = f.eval(code, WorkflowData::default()).unwrap_err();
            assert_eq!(err.code, RuntimeErrorCode::SecurityViolation, "{code}");
        }
    }

    #[test]
    fn caught_traps_still_report_the_violation() {
        let mut f = Fixture::new();
        let err = f
            .eval("(() => { try { return eval('1'); } catch (e) { return 'ok'; } })()", WorkflowData::default())
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::SecurityViolation);
    }

    #[test]
    fn non_whitelisted_globals_are_gone() {
        let mut f = Fixture::new();
        assert_eq!(
            f.eval("typeof globalThis", WorkflowData::default())
                .unwrap(),
            ExprValue::Json(json!("undefined"))
        );
        assert_eq!(
            f.eval("typeof Reflect", WorkflowData::default()).unwrap(),
            ExprValue::Json(json!("undefined"))
        );
    }

    #[test]
    fn intrinsics_are_frozen() {
        let mut f = Fixture::new();
        let err = f
            .eval("(Array.prototype.polluted = 1)", WorkflowData::default())
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::Runtime);
        assert_eq!(
            f.eval("Object.isFrozen(Object.prototype)", WorkflowData::default())
                .unwrap(),
            ExprValue::Json(json!(true))
        );
    }

    #[test]
    fn instance_reachable_prototypes_cannot_be_patched() {
        let mut f = Fixture::new();
        let spread = "[...[1, 2, 3]].length";
        assert_eq!(
            f.eval(spread, WorkflowData::default()).unwrap(),
            ExprValue::Json(json!(3))
        );

        let err = f
            .eval(
                "(() => { const p = Object.getPrototypeOf([][Symbol.iterator]()); p.next = function () { return { done: true }; }; return Object.isFrozen(p); })()",
                WorkflowData::default(),
            )
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::Runtime);
        assert_eq!(
            f.eval(spread, WorkflowData::default()).unwrap(),
            ExprValue::Json(json!(3))
        );

        for reach in [
            "Object.getPrototypeOf(Object.getPrototypeOf([][Symbol.iterator]()))",
            "Object.getPrototypeOf(new Map().entries())",
            "Object.getPrototypeOf(new Set().values())",
            "Object.getPrototypeOf(''[Symbol.iterator]())",
            "Object.getPrototypeOf((function* () {})())",
            "Object.getPrototypeOf((async function () {})())",
        ] {
            let check = format!("Object.isFrozen({reach})");
            assert_eq!(
                f.eval(&check, WorkflowData::default()).unwrap(),
                ExprValue::Json(json!(true)),
                "{reach}"
            );
        }
        assert_eq!(
            f.eval("Array.from(new Map([[1, 'a']]).values()).join()", WorkflowData::default())
                .unwrap(),
            ExprValue::Json(json!("a"))
        );
    }

    #[test]
    fn syntax_errors_are_classified() {
        let mut f = Fixture::new();
        let err = f.eval("1 +", WorkflowData::default()).unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::SyntaxError);
    }

    #[test]
    fn thrown_values_are_runtime_errors() {
        let mut f = Fixture::new();
        let err = f
            .eval("(() => { throw new TypeError('bad input'); })()", WorkflowData::default())
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::Runtime);
        assert!(err.message.contains("bad input"));

        let err = f
            .eval("(() => { throw 'plain'; })()", WorkflowData::default())
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::Runtime);
        assert!(err.message.contains("plain"));
    }

    #[test]
    fn runaway_loops_hit_the_iteration_limit() {
        let mut f = Fixture::with_config(BridgeConfig {
            max_loop_iterations: 1_000,
            ..BridgeConfig::default()
        });
        let err = f
            .eval("(() => { while (true) {} })()", WorkflowData::default())
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::Timeout);
    }

    #[test]
    fn oversized_code_and_output_are_rejected() {
        let mut f = Fixture::with_config(BridgeConfig {
            max_code_length: 16,
            max_output_bytes: 64,
            ..BridgeConfig::default()
        });
        let err = f
            .eval("'aaaaaaaaaaaaaaaaaaaaaaaaaaaa'", WorkflowData::default())
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::SecurityViolation);

        let err = f
            .eval("'x'.repeat(500)", WorkflowData::default())
            .unwrap_err();
        assert_eq!(err.code, RuntimeErrorCode::MemoryLimit);
    }

    #[test]
    fn state_does_not_leak_between_calls() {
        let mut f = Fixture::new();
        f.eval("(() => { var leaked = 1; return leaked; })()", WorkflowData::default())
            .unwrap();
        assert_eq!(
            f.eval("typeof leaked", WorkflowData::default()).unwrap(),
            ExprValue::Json(json!("undefined"))
        );
    }
}
