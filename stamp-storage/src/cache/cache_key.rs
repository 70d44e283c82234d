//! Cache key composition.
//!
//! A result key has three components joined by [`KEY_SEPARATOR`]:
//!
//! ```text
//! <group>:<token>:<sha256 of canonical params>
//! ```
//!
//! Bumping the group's token changes the middle component, so every key
//! composed before the bump becomes unreachable without being deleted.
//! Change tokens themselves live under `last_changed:<group>`, and
//! per-item entries under `<prefix>:<id>`. Group names cannot contain the
//! separator, so the three shapes never collide.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use stamp_core::{GroupId, StampResult, ValidationError, KEY_SEPARATOR};

use super::change_token::ChangeToken;

/// A fully composed result-cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compose the key for `params_hash` under the group's current token.
    pub fn compose(token: &ChangeToken, params_hash: &str) -> Self {
        Self(format!(
            "{}{sep}{}{sep}{}",
            token.group(),
            token.value(),
            params_hash,
            sep = KEY_SEPARATOR
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Backend key the change token for `group` is stored under.
pub fn token_storage_key(group: &GroupId) -> String {
    format!(
        "{}{}{}",
        GroupId::RESERVED_TOKEN_PREFIX,
        KEY_SEPARATOR,
        group
    )
}

/// Backend key for a single cached item, e.g. `record:<uuid>`.
pub fn item_key(prefix: &str, id: impl fmt::Display) -> String {
    format!("{}{}{}", prefix, KEY_SEPARATOR, id)
}

/// Convert caller params into a JSON value.
///
/// Params that cannot be represented (maps with non-string keys, failing
/// `Serialize` impls) are a caller bug and are rejected outright.
pub fn params_to_value<P: Serialize + ?Sized>(params: &P) -> StampResult<Value> {
    serde_json::to_value(params).map_err(|e| {
        ValidationError::InvalidValue {
            field: "params".to_string(),
            reason: format!("not serializable: {}", e),
        }
        .into()
    })
}

/// Rewrite `value` so that semantically equal params are structurally equal.
///
/// Object keys are sorted at every depth. `null` and `{}` both mean "no
/// params" and map to the empty object. Array order is significant and is
/// kept.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Null => Value::Object(Map::new()),
        other => canonicalize_inner(other),
    }
}

fn canonicalize_inner(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize_inner(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_inner).collect()),
        scalar => scalar,
    }
}

/// Lowercase hex SHA-256 of the canonical JSON encoding of `value`.
pub fn stable_hash(value: &Value) -> StampResult<String> {
    let canonical = canonicalize(value.clone());
    let bytes = serde_json::to_vec(&canonical).map_err(|e| ValidationError::InvalidValue {
        field: "params".to_string(),
        reason: e.to_string(),
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Serialize, canonicalize, and hash caller params in one step.
pub fn hash_params<P: Serialize + ?Sized>(params: &P) -> StampResult<String> {
    stable_hash(&params_to_value(params)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(stable_hash(&a).unwrap(), stable_hash(&b).unwrap());
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let a = json!({"outer": {"x": [1, {"q": 1, "p": 2}], "y": null}});
        let b = json!({"outer": {"y": null, "x": [1, {"p": 2, "q": 1}]}});
        assert_eq!(canonicalize(a), canonicalize(b));
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!({"status": ["publish", "draft"]});
        let b = json!({"status": ["draft", "publish"]});
        assert_ne!(stable_hash(&a).unwrap(), stable_hash(&b).unwrap());
    }

    #[test]
    fn test_values_distinguish_hashes() {
        let a = json!({"number": 1000});
        let b = json!({"number": 2});
        assert_ne!(stable_hash(&a).unwrap(), stable_hash(&b).unwrap());
    }

    #[test]
    fn test_empty_params_hash_to_constant() {
        let empty = stable_hash(&json!({})).unwrap();
        assert_eq!(stable_hash(&Value::Null).unwrap(), empty);
        assert_eq!(hash_params(&()).unwrap(), empty);
        assert_eq!(empty.len(), 64);
        assert!(empty.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_non_string_map_keys_are_rejected() {
        let mut params: HashMap<(u8, u8), u8> = HashMap::new();
        params.insert((1, 2), 3);
        let err = hash_params(&params).unwrap_err();
        assert!(matches!(
            err,
            stamp_core::StampError::Validation(ValidationError::InvalidValue { ref field, .. })
                if field == "params"
        ));
    }

    #[test]
    fn test_compose_shape() {
        let token = ChangeToken::new(GroupId::new("pages").unwrap(), "1700000000.000001");
        let key = CacheKey::compose(&token, "abc");
        assert_eq!(key.as_str(), "pages:1700000000.000001:abc");
    }

    #[test]
    fn test_storage_keys_do_not_collide_with_result_keys() {
        let group = GroupId::records();
        assert_eq!(token_storage_key(&group), "last_changed:records");
        assert_eq!(item_key("record", 7), "record:7");
        assert_eq!(token_storage_key(&group).matches(KEY_SEPARATOR).count(), 1);
    }
}
