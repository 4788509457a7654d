//! Hardening applied once to every fresh context.
//!
//! Globals outside the allow-list are deleted, code-generation entry points
//! (`eval`, `Function` and the `constructor` of every function prototype)
//! are replaced with a trap, and the global object plus every intrinsic
//! reachable from it or from a fresh instance (iterators, generators,
//! promises) is frozen deeply.

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::object::builtins::JsArray;
use boa_engine::{Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source};
use exprbox_types::error::RuntimeError;

use super::builtins::HELPER_GLOBALS;
use super::scope::FaultSlot;

/// Standard globals expressions may use.
pub const ALLOWED_GLOBALS: &[&str] = &[
    "Object",
    "Array",
    "String",
    "Number",
    "Boolean",
    "Math",
    "JSON",
    "Date",
    "RegExp",
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "Map",
    "Set",
    "Symbol",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURI",
    "encodeURIComponent",
    "decodeURI",
    "decodeURIComponent",
    "NaN",
    "Infinity",
    "undefined",
];

const PRELUDE: &str = r#"
(function (trap, allowed) {
  "use strict";
  const global = globalThis;
  const ownKeys = Reflect.ownKeys;
  const keep = new Set(allowed);
  for (const name of Object.getOwnPropertyNames(global)) {
    if (!keep.has(name)) {
      try { delete global[name]; } catch (_) {}
    }
  }

  const guard = (name) => ({
    get() { return trap(name); },
    set() { return trap(name); },
    enumerable: false,
    configurable: false,
  });
  const functionPrototypes = [
    Object.getPrototypeOf(function () {}),
    Object.getPrototypeOf(function* () {}),
    Object.getPrototypeOf(async function () {}),
    Object.getPrototypeOf(async function* () {}),
  ];
  for (const proto of functionPrototypes) {
    Object.defineProperty(proto, "constructor", guard("constructor"));
  }

  // Intrinsics that no global names but any expression can reach from an instance.
  const reach = (make) => {
    try { return Object.getPrototypeOf(make()); } catch (_) { return undefined; }
  };
  const hidden = [
    reach(() => [][Symbol.iterator]()),
    reach(() => new Map().entries()),
    reach(() => new Set().values()),
    reach(() => ""[Symbol.iterator]()),
    reach(() => /a/g[Symbol.matchAll]("a")),
    reach(() => (function* () {})()),
    reach(() => (async function* () {})()),
    reach(() => (async function () {})()),
    Object.getOwnPropertyDescriptor((function () { return arguments; })(), "callee"),
  ];

  const frozen = new Set();
  const freeze = (value) => {
    if ((typeof value !== "object" && typeof value !== "function") || value === null) return;
    if (frozen.has(value)) return;
    frozen.add(value);
    Object.freeze(value);
    freeze(Object.getPrototypeOf(value));
    for (const key of ownKeys(value)) {
      const descriptor = Object.getOwnPropertyDescriptor(value, key);
      if (!descriptor) continue;
      freeze(descriptor.value);
      freeze(descriptor.get);
      freeze(descriptor.set);
    }
  };
  for (const proto of functionPrototypes) freeze(proto);
  for (const proto of hidden) freeze(proto);
  for (const name of Object.getOwnPropertyNames(global)) {
    const descriptor = Object.getOwnPropertyDescriptor(global, name);
    if (descriptor && "value" in descriptor) freeze(descriptor.value);
  }

  Object.defineProperty(global, "eval", guard("eval"));
  Object.defineProperty(global, "Function", guard("Function"));
  Object.freeze(global);
})
"#;

/// Lock `context` down. Accesses to trapped names record a security
/// violation in `fault` and throw.
pub fn harden(context: &mut Context, fault: &FaultSlot) -> JsResult<()> {
    let installer = context.eval(Source::from_bytes(PRELUDE))?;
    let installer = installer.as_callable().cloned().ok_or_else(|| {
        JsNativeError::typ().with_message("hardening prelude did not evaluate to a function")
    })?;

    let fault = fault.clone();
    // SAFETY: the closure captures only `FaultSlot`, a host-side cell that
    // holds no GC-managed values.
    let trap = unsafe {
        NativeFunction::from_closure(move |_this, args, _ctx| {
            let name = args
                .first()
                .and_then(JsValue::as_string)
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_default();
            Err(fault.raise(RuntimeError::security(format!(
                "access to '{name}' is not allowed"
            ))))
        })
    };
    let trap = FunctionObjectBuilder::new(context.realm(), trap)
        .length(1)
        .constructor(false)
        .build();

    let allowed = JsArray::from_iter(
        ALLOWED_GLOBALS
            .iter()
            .chain(HELPER_GLOBALS)
            .map(|name| JsValue::from(JsString::from(*name))),
        context,
    );
    installer.call(&JsValue::undefined(), &[trap.into(), allowed.into()], context)?;
    Ok(())
}
