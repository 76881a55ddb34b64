//! BLAKE3 digests for step definitions.

use crate::core::types::StepSpec;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple components.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Digest of a step's declared definition (kind, deps, executor, templates).
///
/// Recorded with in-flight and succeeded entries so a later run can tell when
/// a step that already produced an identity has been edited since.
pub fn hash_spec(step_id: &str, spec: &StepSpec) -> String {
    // serde_json maps are sorted, so the encoding is stable
    let encoded = serde_json::to_string(spec).unwrap_or_default();
    composite_hash(&[step_id, &encoded])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepKind;

    fn spec(args: Vec<serde_json::Value>) -> StepSpec {
        StepSpec {
            kind: StepKind::Deploy,
            depends_on: vec![],
            contract: Some("StructPLP".to_string()),
            target: None,
            method: None,
            args,
            timeout_secs: None,
            description: None,
        }
    }

    #[test]
    fn test_hasher_hash_string() {
        let h1 = hash_string("hello");
        assert_eq!(h1, hash_string("hello"));
        assert_ne!(h1, hash_string("world"));
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64);
    }

    #[test]
    fn test_hasher_composite_order_matters() {
        let h = composite_hash(&["a", "b"]);
        assert_ne!(h, composite_hash(&["b", "a"]));
        // Separator keeps boundaries distinct
        assert_ne!(composite_hash(&["ab", "c"]), composite_hash(&["a", "bc"]));
    }

    #[test]
    fn test_hasher_spec_stable_and_sensitive() {
        let a = spec(vec![serde_json::json!("SPLP")]);
        assert_eq!(hash_spec("token", &a), hash_spec("token", &a.clone()));
        assert_ne!(hash_spec("token", &a), hash_spec("other", &a));
        let b = spec(vec![serde_json::json!("SPLP2")]);
        assert_ne!(hash_spec("token", &a), hash_spec("token", &b));
    }
}
