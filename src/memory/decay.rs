//! Exponential half-life decay and recency scoring for memory recall.
//!
//! Decayed confidence: `floor + (initial - floor) * 0.5^(elapsed / half_life)`.
//! Pinned-tier memories have an infinite effective half-life and never decay.

use super::{MemoryKind, MemoryTier};

/// Confidence never decays below this. Zero: one half-life halves the
/// confidence itself, and fully stale memories bottom out at nothing.
pub const CONFIDENCE_FLOOR: f64 = 0.0;

/// Weight of decayed confidence vs recency in combined relevance.
pub const DEFAULT_ALPHA: f64 = 0.7;

/// Baseline half-life per memory kind, in hours.
pub fn default_half_life_hours(kind: MemoryKind) -> f64 {
    match kind {
        MemoryKind::Semantic => 720.0,
        MemoryKind::Episodic => 48.0,
        MemoryKind::Procedural => 168.0,
    }
}

/// Tier multiplier applied to the kind's half-life.
pub fn tier_multiplier(tier: MemoryTier) -> f64 {
    match tier {
        MemoryTier::Pinned => f64::INFINITY,
        MemoryTier::Standard => 1.0,
        MemoryTier::Ephemeral => 0.25,
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Apply the decay curve directly.
pub fn decayed_confidence(initial: f64, elapsed_hours: f64, half_life_hours: f64) -> f64 {
    let initial = clamp01(initial);
    if elapsed_hours <= 0.0 {
        return initial;
    }
    if half_life_hours <= 0.0 {
        return CONFIDENCE_FLOOR;
    }
    if half_life_hours.is_infinite() {
        return initial;
    }
    let decay = 0.5f64.powf(elapsed_hours / half_life_hours);
    clamp01(CONFIDENCE_FLOOR + (initial - CONFIDENCE_FLOOR) * decay)
}

/// Kind/tier-aware decay: composes the kind half-life with the tier
/// multiplier, then applies the curve.
pub fn effective_confidence(
    kind: MemoryKind,
    tier: MemoryTier,
    initial: f64,
    elapsed_hours: f64,
) -> f64 {
    let half_life = default_half_life_hours(kind) * tier_multiplier(tier);
    decayed_confidence(initial, elapsed_hours, half_life)
}

/// Pure recency score in [0, 1]: 1.0 right now, halving every half-life.
pub fn recency_score(elapsed_hours: f64, half_life_hours: f64) -> f64 {
    if elapsed_hours <= 0.0 {
        return 1.0;
    }
    if half_life_hours <= 0.0 {
        return 0.0;
    }
    if half_life_hours.is_infinite() {
        return 1.0;
    }
    clamp01(0.5f64.powf(elapsed_hours / half_life_hours))
}

/// Weighted blend of decayed confidence and recency, clamped to [0, 1].
pub fn combined_relevance(decayed: f64, recency: f64, alpha: f64) -> f64 {
    let alpha = clamp01(alpha);
    clamp01(alpha * clamp01(decayed) + (1.0 - alpha) * clamp01(recency))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_lives() {
        assert_eq!(default_half_life_hours(MemoryKind::Semantic), 720.0);
        assert_eq!(default_half_life_hours(MemoryKind::Episodic), 48.0);
        assert_eq!(default_half_life_hours(MemoryKind::Procedural), 168.0);
    }

    #[test]
    fn test_one_half_life_halves_confidence() {
        let got = decayed_confidence(0.85, 48.0, 48.0);
        assert!((got - 0.425).abs() < 1e-10);

        let got = effective_confidence(MemoryKind::Episodic, MemoryTier::Standard, 0.8, 48.0);
        assert!((got - 0.4).abs() < 1e-10);
    }

    #[test]
    fn test_pinned_never_decays() {
        for elapsed in [0.0, 1.0, 10_000.0, 1e9] {
            let got = effective_confidence(MemoryKind::Episodic, MemoryTier::Pinned, 0.6, elapsed);
            assert_eq!(got, 0.6);
        }
    }

    #[test]
    fn test_ephemeral_decays_faster_than_standard() {
        let standard = effective_confidence(MemoryKind::Episodic, MemoryTier::Standard, 0.9, 24.0);
        let ephemeral =
            effective_confidence(MemoryKind::Episodic, MemoryTier::Ephemeral, 0.9, 24.0);
        assert!(ephemeral < standard);
    }

    #[test]
    fn test_non_positive_elapsed_returns_initial() {
        assert_eq!(decayed_confidence(0.7, 0.0, 48.0), 0.7);
        assert_eq!(decayed_confidence(0.7, -5.0, 48.0), 0.7);
    }

    #[test]
    fn test_non_positive_half_life_returns_floor() {
        assert_eq!(decayed_confidence(0.7, 10.0, 0.0), CONFIDENCE_FLOOR);
        assert_eq!(decayed_confidence(0.7, 10.0, -1.0), CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_large_elapsed_converges_to_floor() {
        let got = decayed_confidence(1.0, 1e7, 48.0);
        assert!((got - CONFIDENCE_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_hold_across_grid() {
        for kind in [
            MemoryKind::Semantic,
            MemoryKind::Episodic,
            MemoryKind::Procedural,
        ] {
            for tier in [MemoryTier::Pinned, MemoryTier::Standard, MemoryTier::Ephemeral] {
                for initial in [0.0, 0.05, 0.3, 0.7, 1.0] {
                    for elapsed in [0.0, 1.0, 48.0, 720.0, 1e6] {
                        let got = effective_confidence(kind, tier, initial, elapsed);
                        assert!(got >= CONFIDENCE_FLOOR - 1e-12);
                        assert!(got <= initial + 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_recency_score() {
        assert_eq!(recency_score(0.0, 48.0), 1.0);
        assert!((recency_score(48.0, 48.0) - 0.5).abs() < 1e-12);
        assert_eq!(recency_score(10.0, 0.0), 0.0);
        assert_eq!(recency_score(10.0, f64::INFINITY), 1.0);
    }

    #[test]
    fn test_combined_relevance_clamps() {
        assert_eq!(combined_relevance(2.0, 2.0, 0.5), 1.0);
        assert_eq!(combined_relevance(-1.0, -1.0, 0.5), 0.0);
        let got = combined_relevance(0.8, 0.4, 0.7);
        assert!((got - (0.7 * 0.8 + 0.3 * 0.4)).abs() < 1e-12);
    }
}
