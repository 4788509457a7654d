//! Runtime globals handed to every compiled expression.
//!
//! They are passed as parameters of the expression wrapper rather than
//! installed on the global object, so nothing from one call is reachable
//! from the next.

use std::rc::Rc;

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::object::builtins::{JsArray, JsFunction};
use boa_engine::property::PropertyDescriptor;
use boa_engine::{Context, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction, js_string};
use exprbox_types::data::{DataPath, ExecutionMeta};
use exprbox_types::value::{FetchMode, LazyValue};
use serde_json::{Value, json};

use super::lazy::{define_lazy, fetch_lazy};
use super::scope::CallScope;

/// Parameter names of the expression wrapper, in argument order.
pub const PARAMS: &[&str] = &[
    "$",
    "$json",
    "$item",
    "$input",
    "$now",
    "$today",
    "$workflow",
    "$execution",
    "$node",
    "$runIndex",
    "$itemIndex",
];

/// Build the argument vector matching [`PARAMS`].
pub fn arguments(
    meta: &ExecutionMeta,
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsResult<Vec<JsValue>> {
    let now = chrono::Utc::now();
    let today = format!("{}T00:00:00+00:00", now.date_naive());

    Ok(vec![
        node_lookup(meta.item_index, scope, context).into(),
        fetch_lazy(&DataPath::json(), scope, context)?,
        item_lookup(meta.run_index, scope, context).into(),
        collection(DataPath::input(), meta.item_index, scope, context)?.into(),
        JsValue::from(JsString::from(now.to_rfc3339())),
        JsValue::from(JsString::from(today)),
        JsValue::from_json(
            &json!({ "id": meta.workflow_id, "name": meta.workflow_name }),
            context,
        )?,
        JsValue::from_json(&json!({ "id": meta.execution_id }), context)?,
        JsValue::from_json(&json!({ "name": meta.node_name }), context)?,
        JsValue::from(meta.run_index as f64),
        JsValue::from(meta.item_index as f64),
    ])
}

/// `$input` / `$("Node")`: accessors over one list of items.
fn collection(
    base: DataPath,
    item_index: usize,
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsResult<JsObject> {
    let object = JsObject::with_null_proto();

    let all = {
        let base = base.clone();
        let scope = Rc::clone(scope);
        native(context, "all", 0, move |_, _, ctx| {
            match scope.fetch(&base, FetchMode::Full)? {
                LazyValue::Materialized {
                    value: Value::Array(items),
                } => {
                    let wrapped: Vec<Value> =
                        items.into_iter().map(|item| json!({ "json": item })).collect();
                    JsValue::from_json(&Value::Array(wrapped), ctx)
                }
                _ => Ok(JsArray::new(ctx).into()),
            }
        })
    };
    object.create_data_property_or_throw(js_string!("all"), all, context)?;

    let first = {
        let base = base.clone();
        let scope = Rc::clone(scope);
        native(context, "first", 0, move |_, _, ctx| match item_count(&base, &scope)? {
            Some(len) if len > 0 => Ok(item_wrapper(&base.index(0), &["json"], &scope, ctx)?.into()),
            _ => Ok(JsValue::undefined()),
        })
    };
    object.create_data_property_or_throw(js_string!("first"), first, context)?;

    let last = {
        let base = base.clone();
        let scope = Rc::clone(scope);
        native(context, "last", 0, move |_, _, ctx| match item_count(&base, &scope)? {
            Some(len) if len > 0 => {
                Ok(item_wrapper(&base.index(len - 1), &["json"], &scope, ctx)?.into())
            }
            _ => Ok(JsValue::undefined()),
        })
    };
    object.create_data_property_or_throw(js_string!("last"), last, context)?;

    let item = {
        let path = base.index(item_index);
        let scope = Rc::clone(scope);
        native(context, "item", 0, move |_, _, ctx| {
            if scope.fetch(&path, FetchMode::Shallow)?.is_missing() {
                return Ok(JsValue::undefined());
            }
            Ok(item_wrapper(&path, &["json"], &scope, ctx)?.into())
        })
    };
    object.define_property_or_throw(
        js_string!("item"),
        PropertyDescriptor::builder()
            .get(item)
            .enumerable(true)
            .configurable(true),
        context,
    )?;

    Ok(object)
}

/// `$item(index, runIndex?)`
fn item_lookup(run_index: usize, scope: &Rc<CallScope>, context: &mut Context) -> JsFunction {
    let scope = Rc::clone(scope);
    native(context, "$item", 2, move |_, args, ctx| {
        let Some(index) = args.first() else {
            return Err(JsNativeError::typ()
                .with_message("$item requires an item index")
                .into());
        };
        let index = index.to_number(ctx)?;
        if !(index.is_finite() && index >= 0.0 && index.fract() == 0.0) {
            return Ok(JsValue::undefined());
        }
        if let Some(requested) = args.get(1).filter(|v| !v.is_undefined()) {
            if requested.to_number(ctx)? != run_index as f64 {
                return Ok(JsValue::undefined());
            }
        }
        let path = DataPath::input().index(index as usize);
        if scope.fetch(&path, FetchMode::Shallow)?.is_missing() {
            return Ok(JsValue::undefined());
        }
        Ok(item_wrapper(&path, &["json", "$json"], &scope, ctx)?.into())
    })
}

/// `$("Node Name")`
fn node_lookup(item_index: usize, scope: &Rc<CallScope>, context: &mut Context) -> JsFunction {
    let scope = Rc::clone(scope);
    native(context, "$", 1, move |_, args, ctx| {
        let Some(name) = args.first().and_then(JsValue::as_string) else {
            return Err(JsNativeError::typ()
                .with_message("node name must be a string")
                .into());
        };
        let name = name.to_std_string_escaped();
        let base = DataPath::node(name.as_str());
        if scope.fetch(&base, FetchMode::Shallow)?.is_missing() {
            return Err(JsNativeError::reference()
                .with_message(format!("no output data for node \"{name}\""))
                .into());
        }
        Ok(collection(base, item_index, &scope, ctx)?.into())
    })
}

fn item_count(base: &DataPath, scope: &CallScope) -> JsResult<Option<usize>> {
    Ok(match scope.fetch(base, FetchMode::Shallow)? {
        LazyValue::Array { len } => Some(len),
        _ => None,
    })
}

/// `{ json }` wrapper around one item, with the item itself fetched lazily.
fn item_wrapper(
    path: &DataPath,
    names: &[&str],
    scope: &Rc<CallScope>,
    context: &mut Context,
) -> JsResult<JsObject> {
    let object = JsObject::with_null_proto();
    for name in names {
        define_lazy(&object, name, path.clone(), scope, context)?;
    }
    Ok(object)
}

fn native<F>(context: &mut Context, name: &str, length: usize, body: F) -> JsFunction
where
    F: Fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue> + 'static,
{
    // SAFETY: every closure passed here captures only `DataPath`, plain
    // integers and `Rc<CallScope>`, none of which hold GC-managed values.
    let function = unsafe { NativeFunction::from_closure(body) };
    FunctionObjectBuilder::new(context.realm(), function)
        .name(JsString::from(name))
        .length(length)
        .constructor(false)
        .build()
}
