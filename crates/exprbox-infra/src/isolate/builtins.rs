//! Helper libraries injected into every isolate by value.
//!
//! Each helper is a native function with no reference back into host
//! state; results are fresh JavaScript values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{Context, JsNativeError, JsResult, JsValue, NativeFunction, js_string};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use uuid::Uuid;

/// Global names the helpers occupy. They survive the hardening prelude.
pub const HELPER_GLOBALS: &[&str] = &["crypto", "base64", "btoa", "atob", "uuid", "console"];

/// Register all helper libraries into a fresh context.
pub fn register_all(context: &mut Context, debug: bool) -> JsResult<()> {
    register_crypto(context)?;
    register_base64(context)?;
    register_uuid(context)?;
    register_console(context, debug)?;
    Ok(())
}

fn register_crypto(context: &mut Context) -> JsResult<()> {
    let mut initializer = ObjectInitializer::new(context);
    initializer
        .function(NativeFunction::from_fn_ptr(crypto_sha256), js_string!("sha256"), 1)
        .function(NativeFunction::from_fn_ptr(crypto_sha512), js_string!("sha512"), 1)
        .function(
            NativeFunction::from_fn_ptr(crypto_hmac_sha256),
            js_string!("hmacSha256"),
            2,
        );
    let crypto = initializer.build();
    context.register_global_property(js_string!("crypto"), crypto, Attribute::all())?;
    Ok(())
}

fn register_base64(context: &mut Context) -> JsResult<()> {
    let mut initializer = ObjectInitializer::new(context);
    initializer
        .function(NativeFunction::from_fn_ptr(base64_encode), js_string!("encode"), 1)
        .function(NativeFunction::from_fn_ptr(base64_decode), js_string!("decode"), 1);
    let base64 = initializer.build();
    context.register_global_property(js_string!("base64"), base64, Attribute::all())?;

    let btoa = FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(base64_encode))
        .name(js_string!("btoa"))
        .length(1)
        .constructor(false)
        .build();
    let atob = FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(base64_decode))
        .name(js_string!("atob"))
        .length(1)
        .constructor(false)
        .build();
    context.register_global_property(js_string!("btoa"), btoa, Attribute::all())?;
    context.register_global_property(js_string!("atob"), atob, Attribute::all())?;
    Ok(())
}

fn register_uuid(context: &mut Context) -> JsResult<()> {
    let uuid = FunctionObjectBuilder::new(context.realm(), NativeFunction::from_fn_ptr(uuid_v4))
        .name(js_string!("uuid"))
        .length(0)
        .constructor(false)
        .build();
    context.register_global_property(js_string!("uuid"), uuid, Attribute::all())?;
    Ok(())
}

fn register_console(context: &mut Context, debug: bool) -> JsResult<()> {
    let sink: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue> =
        if debug { console_forward } else { console_discard };
    let mut initializer = ObjectInitializer::new(context);
    for level in ["log", "info", "warn", "error", "debug"] {
        initializer.function(NativeFunction::from_fn_ptr(sink), js_string!(level), 0);
    }
    let console = initializer.build();
    context.register_global_property(js_string!("console"), console, Attribute::all())?;
    Ok(())
}

fn crypto_sha256(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let input = js_arg_to_string(args.first());
    let digest = Sha256::digest(input.as_bytes());
    Ok(JsValue::from(js_string!(format!("{:x}", digest))))
}

fn crypto_sha512(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let input = js_arg_to_string(args.first());
    let digest = Sha512::digest(input.as_bytes());
    Ok(JsValue::from(js_string!(format!("{:x}", digest))))
}

fn crypto_hmac_sha256(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let key = js_arg_to_string(args.first());
    let msg = js_arg_to_string(args.get(1));
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| JsNativeError::typ().with_message("Invalid HMAC key"))?;
    mac.update(msg.as_bytes());
    Ok(JsValue::from(js_string!(format!("{:x}", mac.finalize().into_bytes()))))
}

fn base64_encode(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let input = js_arg_to_string(args.first());
    Ok(JsValue::from(js_string!(BASE64_STANDARD.encode(input.as_bytes()))))
}

fn base64_decode(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let input = js_arg_to_string(args.first());
    let decoded = BASE64_STANDARD
        .decode(input.as_bytes())
        .map_err(|_| JsNativeError::typ().with_message("Invalid base64 input"))?;
    let s = String::from_utf8(decoded)
        .map_err(|_| JsNativeError::typ().with_message("Invalid UTF-8 string"))?;
    Ok(JsValue::from(js_string!(s)))
}

fn uuid_v4(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(js_string!(Uuid::new_v4().to_string())))
}

fn console_forward(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    // `display` never re-enters user code, unlike `toString`.
    let parts: Vec<String> = args
        .iter()
        .map(|arg| match arg.as_string() {
            Some(s) => s.to_std_string_escaped(),
            None => arg.display().to_string(),
        })
        .collect();
    tracing::debug!(target: "exprbox::console", "{}", parts.join(" "));
    Ok(JsValue::undefined())
}

fn console_discard(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::undefined())
}

fn js_arg_to_string(arg: Option<&JsValue>) -> String {
    arg.and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default()
}
