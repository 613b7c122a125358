use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::types::{AssetId, EventId};

/// Reproducible per-event randomness.
///
/// Every stochastic draw in the evaluation core comes from a generator seeded
/// from `(master_seed, event_id, asset_id)`, never from shared state. Two
/// consequences, both load-bearing:
///
/// - re-running a calculation reproduces bit-identical losses no matter how
///   the work units are partitioned across workers;
/// - workers need no synchronization, since nothing is mutated.
#[derive(Debug, Clone, Copy)]
pub struct MultiEventRng {
    master_seed: u64,
}

/// splitmix64 finalizer; decorrelates consecutive event/asset ids.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl MultiEventRng {
    pub fn new(master_seed: u64) -> Self {
        MultiEventRng { master_seed }
    }

    pub fn for_event_asset(&self, event: EventId, asset: AssetId) -> ChaCha20Rng {
        let stream = mix(event.0) ^ mix(mix(asset.0 as u64 + 1));
        ChaCha20Rng::seed_from_u64(mix(self.master_seed ^ stream))
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn same_key_same_sequence() {
        let rng = MultiEventRng::new(42);
        let a: Vec<f64> =
            rng.for_event_asset(EventId(7), AssetId(3)).random_iter().take(8).collect();
        let b: Vec<f64> =
            rng.for_event_asset(EventId(7), AssetId(3)).random_iter().take(8).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn different_events_diverge() {
        let rng = MultiEventRng::new(42);
        let a: f64 = rng.for_event_asset(EventId(7), AssetId(0)).random();
        let b: f64 = rng.for_event_asset(EventId(8), AssetId(0)).random();
        assert_ne!(a, b);
    }

    #[test]
    fn different_assets_diverge_within_event() {
        let rng = MultiEventRng::new(42);
        let a: f64 = rng.for_event_asset(EventId(7), AssetId(0)).random();
        let b: f64 = rng.for_event_asset(EventId(7), AssetId(1)).random();
        assert_ne!(a, b);
    }

    #[test]
    fn master_seed_changes_everything() {
        let a: f64 = MultiEventRng::new(1).for_event_asset(EventId(7), AssetId(0)).random();
        let b: f64 = MultiEventRng::new(2).for_event_asset(EventId(7), AssetId(0)).random();
        assert_ne!(a, b);
    }
}
