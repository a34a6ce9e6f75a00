//! Field-selective JSON body encryption.
//!
//! A policy is a list of dot-separated paths rooted at `body`. `*` matches
//! any object key or any array index; a numeric segment matches one
//! specific array index. When no policy is configured the whole body is
//! encrypted as a single envelope.

use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::{CResult, Error};
use crate::kms::Kms;

const ENC_TAG: &str = "_enc";
const ENC_ALGO: &str = "gcm";
const ENC_VALUE: &str = "v";

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Key(String),
    Wildcard,
}

/// A parsed set of field rules. Empty means "encrypt the whole body".
#[derive(Clone, Debug, Default)]
pub struct FieldPolicy {
    rules: Vec<Vec<Segment>>,
}

impl FieldPolicy {
    /// Parses rules like `body.ssn` or `body.items.*.token`. Every rule must
    /// start with the literal segment `body`, which is stripped since
    /// encryption always starts from the body value itself.
    pub fn parse(paths: &[String]) -> CResult<Self> {
        let mut rules = Vec::with_capacity(paths.len());
        for path in paths {
            let mut segments = path.split('.');
            match segments.next() {
                Some("body") => {}
                _ => return Err(Error::Value(format!("field policy path must start with 'body': {path}"))),
            }
            let rule: Vec<Segment> = segments
                .map(|s| if s == "*" { Segment::Wildcard } else { Segment::Key(s.to_string()) })
                .collect();
            rules.push(rule);
        }
        Ok(FieldPolicy { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Encrypts `body` under `key_id`, either as one envelope (no policy) or
    /// by walking the tree and encrypting each matched leaf in place.
    pub fn encrypt_body(&self, kms: &Kms, key_id: &str, body: &Value) -> CResult<Value> {
        if self.rules.is_empty() {
            return seal_value(kms, key_id, body);
        }
        let active: Vec<&[Segment]> = self.rules.iter().map(|r| r.as_slice()).collect();
        encrypt_walk(body, &active, kms, key_id)
    }

    /// Decrypts every `{"_enc":"gcm","v":...}` envelope found anywhere in
    /// `body`, structurally, regardless of which policy produced it — the
    /// envelope is self-describing so decryption doesn't need the rules.
    pub fn decrypt_body(&self, kms: &Kms, key_id: &str, body: &Value) -> CResult<Value> {
        decrypt_walk(body, kms, key_id)
    }
}

fn is_envelope(value: &Value) -> bool {
    matches!(value.get(ENC_TAG), Some(Value::String(algo)) if algo == ENC_ALGO) && value.get(ENC_VALUE).is_some()
}

fn seal_value(kms: &Kms, key_id: &str, value: &Value) -> CResult<Value> {
    let plaintext = serde_json::to_vec(value)?;
    let sealed = kms.encrypt_with_dek(key_id, &plaintext, b"")?;
    let mut envelope = Map::new();
    envelope.insert(ENC_TAG.to_string(), Value::String(ENC_ALGO.to_string()));
    envelope.insert(ENC_VALUE.to_string(), Value::String(base64::engine::general_purpose::STANDARD.encode(sealed)));
    Ok(Value::Object(envelope))
}

fn open_value(kms: &Kms, key_id: &str, envelope: &Value) -> CResult<Value> {
    let encoded = envelope
        .get(ENC_VALUE)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Value("malformed encryption envelope".into()))?;
    let sealed = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Value(e.to_string()))?;
    let plaintext = kms.decrypt_with_dek(key_id, &sealed, b"")?;
    Ok(serde_json::from_slice(&plaintext)?)
}

fn encrypt_walk(value: &Value, active: &[&[Segment]], kms: &Kms, key_id: &str) -> CResult<Value> {
    if active.iter().any(|r| r.is_empty()) {
        return seal_value(kms, key_id, value);
    }

    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let child_active = descend(active, k);
                out.insert(
                    k.clone(),
                    if child_active.is_empty() { v.clone() } else { encrypt_walk(v, &child_active, kms, key_id)? },
                );
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, v) in items.iter().enumerate() {
                let child_active = descend(active, &i.to_string());
                out.push(if child_active.is_empty() { v.clone() } else { encrypt_walk(v, &child_active, kms, key_id)? });
            }
            Ok(Value::Array(out))
        }
        // A scalar with no rule matching exactly at this depth: no policy
        // targets it, leave untouched.
        _ => Ok(value.clone()),
    }
}

fn descend<'a>(active: &[&'a [Segment]], key: &str) -> Vec<&'a [Segment]> {
    active
        .iter()
        .filter_map(|r| match &r[0] {
            Segment::Key(name) if name == key => Some(&r[1..]),
            Segment::Wildcard => Some(&r[1..]),
            _ => None,
        })
        .collect()
}

fn decrypt_walk(value: &Value, kms: &Kms, key_id: &str) -> CResult<Value> {
    if is_envelope(value) {
        return open_value(kms, key_id, value);
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), decrypt_walk(v, kms, key_id)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(decrypt_walk(v, kms, key_id)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kms_with_key() -> (Kms, String) {
        let kms = Kms::new();
        kms.set_key_hex(&hex::encode([3u8; 32])).unwrap();
        let (key_id, _) = kms.create_dek_for_thread("t1").unwrap();
        (kms, key_id)
    }

    #[test]
    fn whole_body_round_trips_when_policy_is_empty() {
        let (kms, key_id) = kms_with_key();
        let policy = FieldPolicy::default();
        let body = json!({"text": "hello"});

        let sealed = policy.encrypt_body(&kms, &key_id, &body).unwrap();
        assert!(is_envelope(&sealed));

        let opened = policy.decrypt_body(&kms, &key_id, &sealed).unwrap();
        assert_eq!(opened, body);
    }

    #[test]
    fn field_policy_encrypts_only_matched_leaves() {
        let (kms, key_id) = kms_with_key();
        let policy = FieldPolicy::parse(&[
            "body.ssn".to_string(),
            "body.items.*.token".to_string(),
        ]).unwrap();

        let body = json!({
            "ssn": "X",
            "items": [{"token": "a", "keep": "k"}, {"token": "b"}],
        });

        let sealed = policy.encrypt_body(&kms, &key_id, &body).unwrap();
        assert!(is_envelope(&sealed["ssn"]));
        assert!(is_envelope(&sealed["items"][0]["token"]));
        assert!(is_envelope(&sealed["items"][1]["token"]));
        assert_eq!(sealed["items"][0]["keep"], json!("k"));

        let opened = policy.decrypt_body(&kms, &key_id, &sealed).unwrap();
        assert_eq!(opened, body);
    }

    #[test]
    fn rejects_a_path_not_rooted_at_body() {
        assert!(FieldPolicy::parse(&["ssn".to_string()]).is_err());
    }
}
