//! Dot-path access into a YAML document, used by the `config get`/`set`
//! CLI commands, plus secret masking for `config show`.

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// Key fragments that mark a value as secret-like.
const SECRET_MARKERS: &[&str] = &["api_key", "secret", "password", "token", "private_key"];

/// Look up a dot-separated path (`"telegram.bot_token"`) in a YAML tree.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Set a dot-separated path, creating intermediate mappings as needed.
///
/// Fails when an intermediate segment exists but is not a mapping.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        return Err(Error::Config("empty config path".into()));
    }
    if !root.is_mapping() {
        *root = Value::Mapping(Mapping::new());
    }

    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (i, segment) in segments.iter().enumerate() {
        let key = Value::String((*segment).to_owned());
        let map = current.as_mapping_mut().ok_or_else(|| {
            Error::Config(format!(
                "cannot set \"{path}\": \"{}\" is not a mapping",
                segments[..i].join(".")
            ))
        })?;

        if i == segments.len() - 1 {
            map.insert(key, value);
            return Ok(());
        }

        current = map
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    Ok(())
}

/// Parse a CLI scalar into the most specific YAML value: bool, int, float,
/// then string.
pub fn parse_scalar(raw: &str) -> Value {
    if raw == "true" {
        return Value::Bool(true);
    }
    if raw == "false" {
        return Value::Bool(false);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Number(serde_yaml::Number::from(f));
    }
    Value::String(raw.to_owned())
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

/// Replace secret-like string values with `"********"` in place.
pub fn mask_secrets(value: &mut Value) {
    if let Value::Mapping(map) = value {
        for (key, entry) in map.iter_mut() {
            let secret = key.as_str().map(is_secret_key).unwrap_or(false);
            match entry {
                Value::String(s) if secret && !s.is_empty() => {
                    *s = "********".into();
                }
                Value::Mapping(_) | Value::Sequence(_) => mask_secrets(entry),
                _ => {}
            }
        }
    } else if let Value::Sequence(seq) = value {
        for entry in seq.iter_mut() {
            mask_secrets(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Value {
        serde_yaml::from_str(
            "provider: ppq\ntelegram:\n  bot_token: abc123\n  poll_timeout: 30\n",
        )
        .unwrap()
    }

    #[test]
    fn get_nested_path() {
        let root = doc();
        assert_eq!(
            get_path(&root, "telegram.bot_token").and_then(|v| v.as_str()),
            Some("abc123")
        );
        assert!(get_path(&root, "telegram.nope").is_none());
        assert!(get_path(&root, "nope.deeper").is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut root = doc();
        set_path(&mut root, "polling.interval_seconds", parse_scalar("15")).unwrap();
        assert_eq!(
            get_path(&root, "polling.interval_seconds").and_then(|v| v.as_i64()),
            Some(15)
        );
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut root = doc();
        let err = set_path(&mut root, "provider.sub.key", Value::Bool(true));
        assert!(err.is_err());
    }

    #[test]
    fn parse_scalar_types() {
        assert_eq!(parse_scalar("true"), Value::Bool(true));
        assert_eq!(parse_scalar("42"), Value::Number(42.into()));
        assert_eq!(parse_scalar("hi"), Value::String("hi".into()));
    }

    #[test]
    fn masks_secret_like_keys_recursively() {
        let mut root: Value = serde_yaml::from_str(
            "ppq:\n  api_key: sk-live\n  model: gpt\nwallet:\n  private_key: xyz\n",
        )
        .unwrap();
        mask_secrets(&mut root);
        assert_eq!(
            get_path(&root, "ppq.api_key").and_then(|v| v.as_str()),
            Some("********")
        );
        assert_eq!(
            get_path(&root, "ppq.model").and_then(|v| v.as_str()),
            Some("gpt")
        );
        assert_eq!(
            get_path(&root, "wallet.private_key").and_then(|v| v.as_str()),
            Some("********")
        );
    }
}
