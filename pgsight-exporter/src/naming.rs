//! Prometheus naming rules for instruments and labels.

use crate::error::DefinitionError;

/// Check a metric name against `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Check a label name against `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the
/// reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Join the configured namespace and a local name.
///
/// Format: `{namespace}_{name}`, or just `{name}` for an empty namespace.
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", namespace, name)
    }
}

/// Build a full metric name, rejecting local names that are not valid
/// metric names on their own.
pub fn build_metric_name(namespace: &str, name: &str) -> Result<String, DefinitionError> {
    if !is_valid_metric_name(name) {
        return Err(DefinitionError::InvalidName(name.to_string()));
    }
    Ok(qualify(namespace, name))
}

/// Format a floating point value for the exposition format.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in HELP text.
pub fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
