//! Environment-variable expansion over a YAML tree.
//!
//! `${VAR}` becomes the env value or the empty string; `${VAR:-default}`
//! becomes the env value or the default. Applied recursively to every
//! string scalar; mapping keys are left untouched.

use regex::Regex;
use serde_yaml::Value;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env expansion regex is valid")
    })
}

/// Expand env references in a single string.
pub fn expand_str(input: &str) -> String {
    pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            match std::env::var(var) {
                Ok(value) => value,
                Err(_) => caps.get(2).map(|d| d.as_str().to_owned()).unwrap_or_default(),
            }
        })
        .into_owned()
}

/// Recursively expand env references in every string scalar of a YAML tree.
pub fn expand_env(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_str(&s)),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(expand_env).collect()),
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, expand_env(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_set_variable() {
        std::env::set_var("COBOT_EXPAND_A", "hello");
        assert_eq!(expand_str("${COBOT_EXPAND_A} world"), "hello world");
    }

    #[test]
    fn unset_variable_becomes_empty() {
        std::env::remove_var("COBOT_EXPAND_MISSING");
        assert_eq!(expand_str("x${COBOT_EXPAND_MISSING}y"), "xy");
    }

    #[test]
    fn unset_variable_uses_default() {
        std::env::remove_var("COBOT_EXPAND_MISSING");
        assert_eq!(
            expand_str("${COBOT_EXPAND_MISSING:-fallback}"),
            "fallback"
        );
    }

    #[test]
    fn set_variable_wins_over_default() {
        std::env::set_var("COBOT_EXPAND_B", "real");
        assert_eq!(expand_str("${COBOT_EXPAND_B:-fallback}"), "real");
    }

    #[test]
    fn expansion_recurses_into_sequences_and_mappings() {
        std::env::set_var("COBOT_EXPAND_C", "deep");
        let value: Value =
            serde_yaml::from_str("outer:\n  - \"${COBOT_EXPAND_C}\"\n  - plain\n").unwrap();
        let expanded = expand_env(value);
        let outer = expanded.get("outer").unwrap().as_sequence().unwrap();
        assert_eq!(outer[0].as_str(), Some("deep"));
        assert_eq!(outer[1].as_str(), Some("plain"));
    }
}
