//! Values overlays

use serde_yaml::{Mapping, Value};

/// Deep-merge `overlay` into `base`
///
/// Mappings merge key by key; any other value in `overlay` replaces the one
/// in `base`.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => merge_mappings(base, overlay),
        (base, overlay) => *base = overlay,
    }
}

fn merge_mappings(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => merge_values(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_mappings_merge() {
        let mut base: Value =
            serde_yaml::from_str("image:\n  repository: podinfo\n  tag: 6.0.0\nreplicaCount: 1\n")
                .unwrap();
        let overlay: Value =
            serde_yaml::from_str("image:\n  tag: 6.1.0\nreplicaCount: 3\n").unwrap();

        merge_values(&mut base, overlay);

        assert_eq!(base["image"]["repository"], Value::from("podinfo"));
        assert_eq!(base["image"]["tag"], Value::from("6.1.0"));
        assert_eq!(base["replicaCount"], Value::from(3));
    }

    #[test]
    fn test_sequences_are_replaced() {
        let mut base: Value = serde_yaml::from_str("hosts: [a, b]\n").unwrap();
        merge_values(&mut base, serde_yaml::from_str("hosts: [c]\n").unwrap());
        assert_eq!(base["hosts"], serde_yaml::from_str::<Value>("[c]").unwrap());
    }

    #[test]
    fn test_null_base_takes_overlay() {
        let mut base = Value::Null;
        merge_values(&mut base, serde_yaml::from_str("a: 1\n").unwrap());
        assert_eq!(base["a"], Value::from(1));
    }
}
