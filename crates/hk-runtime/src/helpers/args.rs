use hk_core::HostCallError;
use serde_json::Value;

pub(crate) fn arg<'a>(args: &'a [Value], index: usize) -> &'a Value {
    args.get(index).unwrap_or(&Value::Null)
}

pub(crate) fn arg_str<'a>(
    function: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a str, HostCallError> {
    arg(args, index).as_str().ok_or_else(|| {
        HostCallError::invalid(function, format!("argument {} must be a string", index))
    })
}

pub(crate) fn arg_opt_str(args: &[Value], index: usize) -> Option<&str> {
    arg(args, index).as_str()
}

/// Lenient string coercion for script-facing helpers: numbers and booleans are
/// accepted the way JavaScript would stringify them.
pub(crate) fn arg_text(args: &[Value], index: usize) -> String {
    match arg(args, index) {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn arg_u64(args: &[Value], index: usize) -> Option<u64> {
    let value = arg(args, index);
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|number| *number >= 0.0).map(|number| number as u64))
}

pub(crate) fn arg_bool(args: &[Value], index: usize) -> bool {
    arg(args, index).as_bool().unwrap_or(false)
}
