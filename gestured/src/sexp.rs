//! S-expression plist helpers shared by IPC dispatch, config loading and the
//! replay backend.

use lexpr::Value;

/// Whether `value` is the plist key `:key`.
///
/// Handles both `Value::Keyword("key")` (elisp parser) and
/// `Value::Symbol(":key")` (default parser) forms.
fn is_key(value: &Value, key: &str) -> bool {
    match value {
        Value::Keyword(k) => k.as_ref() == key,
        Value::Symbol(s) => s.strip_prefix(':') == Some(key),
        _ => false,
    }
}

/// Find the raw value following `:key` in a plist.
pub fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = value;
    while let Value::Cons(pair) = current {
        if is_key(pair.car(), key) {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Render an atom as a plain string.  Keywords lose their colon.
pub fn atom_string(value: &Value) -> Option<String> {
    match value {
        Value::Keyword(v) => Some(v.to_string()),
        Value::Symbol(v) => Some(v.strip_prefix(':').unwrap_or(&**v).to_string()),
        Value::String(v) => Some(v.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "t" } else { "nil" }.to_string()),
        Value::Null | Value::Nil => Some("nil".to_string()),
        _ => None,
    }
}

/// Extract a keyword value from an s-expression plist as a string.
pub fn get_keyword(value: &Value, key: &str) -> Option<String> {
    get_value(value, key).and_then(atom_string)
}

/// Extract an integer value from an s-expression plist.
pub fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a floating-point value from an s-expression plist.
pub fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_value(value, key).and_then(number)
}

/// Extract a string value from an s-expression plist.
pub fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

/// Extract a boolean value from an s-expression plist.
/// Treats "t" as true, "nil" as false.
pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Numeric atom as f64.
pub fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// `nil`, `()` or `#f`.
pub fn is_nil(value: &Value) -> bool {
    match value {
        Value::Null | Value::Nil => true,
        Value::Bool(b) => !b,
        Value::Symbol(s) => s.as_ref() == "nil",
        _ => false,
    }
}

/// Elements of a proper list.  Non-list values yield an empty vec.
pub fn list_items(value: &Value) -> Vec<&Value> {
    let mut items = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        items.push(pair.car());
        current = pair.cdr();
    }
    items
}

/// Keys present in a plist, in order.
pub fn plist_keys(value: &Value) -> Vec<String> {
    list_items(value)
        .into_iter()
        .step_by(2)
        .filter_map(|v| match v {
            Value::Keyword(k) => Some(k.to_string()),
            Value::Symbol(s) => s.strip_prefix(':').map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Escape a string for s-expression output.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Quote and escape a string.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

/// Format an IPC event s-expression.
pub fn format_event(event_type: &str, fields: &[(&str, String)]) -> String {
    let mut s = format!("(:type :event :event :{}", event_type);
    for (key, val) in fields {
        s.push_str(&format!(" :{} {}", key, val));
    }
    s.push(')');
    s
}
