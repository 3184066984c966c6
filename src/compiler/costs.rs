//! Cost ladder. Tiers are far enough apart that strategies never trade off
//! against each other in practice.

/// Action cost tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostTier;

impl CostTier {
    pub const ZERO: u64 = 0;
    pub const UNIT: u64 = 10;
    pub const LOW: u64 = 50;
    pub const MEDIUM: u64 = 250;
    pub const INTERMEDIATE: u64 = 1000;
    pub const EDIT: u64 = 1000;
    pub const HIGH: u64 = 5000;
    pub const VERY_HIGH: u64 = 100_000;
}

/// Cost of asking for a slot with the given desirability.
pub fn slot_goodness(desirability: f64) -> u64 {
    scaled(desirability, CostTier::VERY_HIGH)
}

/// Cost of a last-resort ask.
pub fn last_resort_cost(desirability: f64) -> u64 {
    scaled(desirability, CostTier::HIGH)
}

/// Cost of following a mapping with the given probability.
pub fn map_affinity(probability: f64) -> u64 {
    scaled(probability, CostTier::UNIT)
}

fn scaled(value: f64, tier: u64) -> u64 {
    let v = value.clamp(0.0, 1.0);
    ((2.0 - v) * tier as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp007_tiers_are_lexicographic() {
        assert!(CostTier::HIGH > 10 * CostTier::UNIT);
        assert!(CostTier::VERY_HIGH > 10 * CostTier::HIGH);
        assert!(CostTier::INTERMEDIATE > CostTier::MEDIUM);
        assert_eq!(CostTier::EDIT, CostTier::INTERMEDIATE);
    }

    #[test]
    fn test_fp007_slot_goodness() {
        assert_eq!(slot_goodness(1.0), 100_000);
        assert_eq!(slot_goodness(0.5), 150_000);
        assert_eq!(slot_goodness(0.0), 200_000);
        assert_eq!(slot_goodness(1.7), 100_000);
    }

    #[test]
    fn test_fp007_map_affinity() {
        assert_eq!(map_affinity(1.0), 10);
        assert_eq!(map_affinity(0.25), 18);
        assert_eq!(map_affinity(0.0), 20);
    }

    #[test]
    fn test_fp007_last_resort_cost() {
        assert_eq!(last_resort_cost(1.0), 5000);
        assert!(last_resort_cost(0.5) < slot_goodness(1.0));
    }
}
