/// Unit tests for container ID generation properties.
///
/// The core module tests live inline (in core/id.rs); these integration
/// tests exercise the same properties from outside the crate, since
/// `craterun` is a binary-only crate with no public library surface.

use std::collections::HashSet;

const ID_LEN: usize = 12;

fn generate_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..ID_LEN / 2).map(|_| rng.gen()).collect();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn ids_are_unique_over_many_draws() {
    let mut seen = HashSet::new();
    for _ in 0..1000 {
        let id = generate_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(seen.insert(id), "duplicate ID generated");
    }
}

#[test]
fn id_format_is_lowercase_hex() {
    for _ in 0..100 {
        let id = generate_id();
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }
}
