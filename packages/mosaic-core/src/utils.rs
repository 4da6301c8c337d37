//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Volume Clamping
// ─────────────────────────────────────────────────────────────────────────────

/// Clamps a per-slot volume to the valid `[0.0, 1.0]` range.
///
/// Applied once, on ingest of a layout configuration, so every downstream
/// consumer (the filter-graph compiler in particular) can trust its input is
/// already normalized.
#[must_use]
pub fn clamp_volume(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_nonzero() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn clamp_volume_within_range_unchanged() {
        assert_eq!(clamp_volume(0.5), 0.5);
    }

    #[test]
    fn clamp_volume_clamps_above_one() {
        assert_eq!(clamp_volume(1.8), 1.0);
    }

    #[test]
    fn clamp_volume_clamps_below_zero() {
        assert_eq!(clamp_volume(-0.3), 0.0);
    }
}
