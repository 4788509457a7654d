//! Lazy objects: script-visible values that defer every read to the host.
//!
//! A shape answer (`Object { keys }` / `Array { len }`) becomes an object
//! whose own properties are accessors. The first read of a property
//! fetches `path.key` and replaces the accessor with a plain data property,
//! so a path is fetched at most once per call. Keys the host did not list
//! simply do not exist and read as `undefined` without a host round-trip.

use std::rc::Rc;

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::object::builtins::{JsArray, JsFunction};
use boa_engine::property::PropertyDescriptor;
use boa_engine::{Context, JsObject, JsResult, JsString, JsValue, NativeFunction};
use exprbox_types::data::{DataPath, PathSegment};
use exprbox_types::value::{FetchMode, LazyValue};

use super::scope::CallScope;

/// Turn a host answer for `path` into a script value.
pub fn materialize(
    answer: LazyValue,
    path: &DataPath,
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsResult<JsValue> {
    match answer {
        LazyValue::Missing => Ok(JsValue::undefined()),
        LazyValue::Primitive { value } | LazyValue::Materialized { value } => {
            JsValue::from_json(&value, context)
        }
        LazyValue::Object { keys } => lazy_object(&keys, path, scope, context),
        LazyValue::Array { len } => lazy_array(len, path, scope, context),
    }
}

/// Shallow-fetch `path` and materialize it.
pub fn fetch_lazy(path: &DataPath, scope: &Rc<CallScope>, context: &mut Context) -> JsResult<JsValue> {
    let answer = scope.fetch(path, FetchMode::Shallow)?;
    materialize(answer, path, scope, context)
}

fn lazy_object(
    keys: &[String],
    path: &DataPath,
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsResult<JsValue> {
    let object = JsObject::with_null_proto();
    for key in keys {
        define_lazy(&object, key.as_str(), path.key(key.as_str()), scope, context)?;
    }
    Ok(object.into())
}

fn lazy_array(
    len: usize,
    path: &DataPath,
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsResult<JsValue> {
    let array = JsArray::new(context);
    for index in 0..len {
        let getter = lazy_getter(path.index(index), PathSegment::Index(index), scope, context);
        array.define_property_or_throw(
            index,
            PropertyDescriptor::builder()
                .get(getter)
                .enumerable(true)
                .configurable(true),
            context,
        )?;
    }
    Ok(array.into())
}

/// Define `name` on `target` as a lazy accessor for `path`.
pub fn define_lazy(
    target: &JsObject,
    name: &str,
    path: DataPath,
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsResult<()> {
    let getter = lazy_getter(path, PathSegment::Key(name.to_string()), scope, context);
    target.define_property_or_throw(
        JsString::from(name),
        PropertyDescriptor::builder()
            .get(getter)
            .enumerable(true)
            .configurable(true),
        context,
    )?;
    Ok(())
}

fn lazy_getter(
    path: DataPath,
    slot: PathSegment,
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsFunction {
    let scope = Rc::clone(scope);
    // SAFETY: the closure captures only host-owned values (`DataPath`,
    // `PathSegment`, `Rc<CallScope>`); none of them holds a GC-managed
    // pointer, so the collector has nothing to trace through it.
    let native = unsafe {
        NativeFunction::from_closure(move |this, _args, ctx| {
            let value = fetch_lazy(&path, &scope, ctx)?;
            if let Some(target) = this.as_object() {
                let descriptor = PropertyDescriptor::builder()
                    .value(value.clone())
                    .writable(false)
                    .enumerable(true)
                    .configurable(false);
                // A frozen target keeps its accessor; the host memo still
                // answers repeat reads.
                let _ = match &slot {
                    PathSegment::Index(i) => target.define_property_or_throw(*i, descriptor, ctx),
                    PathSegment::Key(k) => {
                        target.define_property_or_throw(JsString::from(k.as_str()), descriptor, ctx)
                    }
                };
            }
            Ok(value)
        })
    };
    FunctionObjectBuilder::new(context.realm(), native)
        .length(0)
        .constructor(false)
        .build()
}
