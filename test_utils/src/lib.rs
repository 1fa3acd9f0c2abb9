//! Deterministic roster fixtures shared by the module test suites

use skipchain_common::{KeyPair, Roster, ServerIdentity};

/// `count` key pairs derived from the seeds `first_seed`, `first_seed + 1`, ...
pub fn fixture_keys(count: usize, first_seed: u8) -> Vec<KeyPair> {
    (0..count)
        .map(|offset| KeyPair::from_seed(&[first_seed.wrapping_add(offset as u8); 32]))
        .collect()
}

/// Roster with one member per key, addressed on consecutive local ports
pub fn roster_of(keys: &[KeyPair]) -> Roster {
    Roster::new(
        keys.iter()
            .enumerate()
            .map(|(position, key)| {
                ServerIdentity::new(key.public(), format!("tcp://127.0.0.1:{}", 7770 + position))
            })
            .collect(),
    )
}

/// The keys and roster most tests run with; the same `count` always yields
/// the same members
pub fn fixture_roster(count: usize) -> (Vec<KeyPair>, Roster) {
    let keys = fixture_keys(count, 1);
    let roster = roster_of(&keys);
    (keys, roster)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_are_deterministic() {
        let (_, first) = fixture_roster(3);
        let (_, second) = fixture_roster(3);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn disjoint_seeds_give_disjoint_rosters() {
        let ours = roster_of(&fixture_keys(2, 1));
        let theirs = roster_of(&fixture_keys(2, 100));
        assert!(ours.public_keys().all(|key| theirs.position(key).is_none()));
    }
}
