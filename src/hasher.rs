//! Deterministic action fingerprints, the keys of the per-block
//! signature map. The mode is fixed once per session: mixing modes in
//! one deployment silently empties every signature lookup.

use serde_json::Value;
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    /// Human-readable dotted form, data digested separately.
    Debug,
    /// Single digest over the concatenated fields.
    Release,
}

#[derive(Debug, Clone, Copy)]
pub struct ActionHasher {
    mode: HashMode,
}

impl ActionHasher {
    pub fn new(mode: HashMode) -> Self {
        Self { mode }
    }

    pub fn from_debug_flag(debug: bool) -> Self {
        Self::new(if debug { HashMode::Debug } else { HashMode::Release })
    }

    /// Fingerprint a decoded action: `{account, name,
    /// authorization[{actor, permission}...], data}` with `data` as the
    /// wire hex string.
    pub fn fingerprint(&self, action: &Value) -> String {
        let account = str_field(action, "account");
        let name = str_field(action, "name");
        let auths: Vec<(&str, &str)> = action
            .get("authorization")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .map(|a| (str_field(a, "actor"), str_field(a, "permission")))
                    .collect()
            })
            .unwrap_or_default();
        let data = action
            .get("data")
            .and_then(Value::as_str)
            .and_then(|s| hex::decode(s).ok())
            .unwrap_or_default();

        self.fingerprint_parts(account, name, &auths, &data)
    }

    pub fn fingerprint_parts(
        &self,
        account: &str,
        name: &str,
        auths: &[(&str, &str)],
        data: &[u8],
    ) -> String {
        match self.mode {
            HashMode::Debug => {
                let mut parts = vec![account.to_string(), name.to_string()];
                for (actor, permission) in auths {
                    parts.push((*actor).to_string());
                    parts.push((*permission).to_string());
                }
                parts.push(hex::encode(Sha1::digest(data)));
                parts.join(".")
            }
            HashMode::Release => {
                let mut hasher = Sha1::new();
                hasher.update(account.as_bytes());
                hasher.update(name.as_bytes());
                for (actor, permission) in auths {
                    hasher.update(actor.as_bytes());
                    hasher.update(permission.as_bytes());
                }
                hasher.update(data);
                hex::encode(hasher.finalize())
            }
        }
    }
}

fn str_field<'v>(value: &'v Value, key: &str) -> &'v str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action() -> Value {
        json!({
            "account": "eosio.evm",
            "name": "raw",
            "authorization": [{"actor": "alice", "permission": "active"}],
            "data": "deadbeef"
        })
    }

    #[test]
    fn debug_mode_is_dotted_and_readable() {
        let hasher = ActionHasher::new(HashMode::Debug);
        let fp = hasher.fingerprint(&action());
        let expected_data = hex::encode(Sha1::digest(hex::decode("deadbeef").unwrap()));
        assert_eq!(
            fp,
            format!("eosio.evm.raw.alice.active.{expected_data}")
        );
    }

    #[test]
    fn release_mode_is_stable_hex() {
        let hasher = ActionHasher::new(HashMode::Release);
        let fp1 = hasher.fingerprint(&action());
        let fp2 = hasher.fingerprint(&action());
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 40);
        assert!(fp1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn modes_differ_but_each_is_deterministic() {
        let debug = ActionHasher::new(HashMode::Debug).fingerprint(&action());
        let release = ActionHasher::new(HashMode::Release).fingerprint(&action());
        assert_ne!(debug, release);
    }

    #[test]
    fn authorization_order_matters() {
        let hasher = ActionHasher::new(HashMode::Release);
        let a = hasher.fingerprint_parts("e", "n", &[("a", "x"), ("b", "y")], b"");
        let b = hasher.fingerprint_parts("e", "n", &[("b", "y"), ("a", "x")], b"");
        assert_ne!(a, b);
    }
}
