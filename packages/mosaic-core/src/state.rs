//! Shared data model: channels, layouts, and runtime state.
//!
//! These types are plain data — the state machine that mutates them lives in
//! [`crate::supervisor`]; the catalog that owns [`Channel`] lives in
//! [`crate::catalog`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::utils::clamp_volume;

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

/// A single catalog entry resolved from an M3U playlist.
///
/// Identity is `id`. Immutable once constructed; the whole catalog is
/// replaced atomically on refresh rather than mutated entry-by-entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_number: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Layout kind
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of supported geometric arrangements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Pip,
    SplitH,
    SplitV,
    #[serde(rename = "grid_2x2")]
    Grid2x2,
    #[serde(rename = "multi_pip_2")]
    MultiPip2,
    #[serde(rename = "multi_pip_3")]
    MultiPip3,
    #[serde(rename = "multi_pip_4")]
    MultiPip4,
    DvdPip,
    Custom,
}

impl LayoutKind {
    /// Returns the fixed, ordered list of slot names for this kind, or
    /// `None` for `Custom` (whose slots are caller-defined).
    #[must_use]
    pub fn canonical_slots(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Pip => Some(&["main", "inset"]),
            Self::SplitH | Self::SplitV => Some(&["slot1", "slot2"]),
            Self::Grid2x2 => Some(&["slot1", "slot2", "slot3", "slot4"]),
            Self::MultiPip2 => Some(&["main", "inset1", "inset2"]),
            Self::MultiPip3 => Some(&["main", "inset1", "inset2", "inset3"]),
            Self::MultiPip4 => Some(&["main", "inset1", "inset2", "inset3", "inset4"]),
            Self::DvdPip => Some(&["main", "inset"]),
            Self::Custom => None,
        }
    }

    /// Maximum number of simultaneous streams this kind can host.
    #[must_use]
    pub fn max_slots(self) -> usize {
        match self {
            Self::Custom => 5,
            kind => kind.canonical_slots().map_or(5, <[&str]>::len),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Custom slot
// ─────────────────────────────────────────────────────────────────────────────

/// A caller-defined rectangular region used only by [`LayoutKind::Custom`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSlot {
    pub id: String,
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub border: bool,
}

impl CustomSlot {
    pub const FRAME_WIDTH: u32 = 1920;
    pub const FRAME_HEIGHT: u32 = 1080;
    pub const MIN_WIDTH: u32 = 320;
    pub const MIN_HEIGHT: u32 = 180;

    /// Validates the bounds and 16:9±1% aspect invariant from §3.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.x + self.width > Self::FRAME_WIDTH || self.y + self.height > Self::FRAME_HEIGHT {
            return Err(AppError::BadGeometry(format!(
                "slot '{}' extends outside the 1920x1080 frame",
                self.name
            )));
        }
        if self.width < Self::MIN_WIDTH || self.width > Self::FRAME_WIDTH {
            return Err(AppError::BadGeometry(format!(
                "slot '{}' width {} out of bounds [{}, {}]",
                self.name,
                self.width,
                Self::MIN_WIDTH,
                Self::FRAME_WIDTH
            )));
        }
        if self.height < Self::MIN_HEIGHT || self.height > Self::FRAME_HEIGHT {
            return Err(AppError::BadGeometry(format!(
                "slot '{}' height {} out of bounds [{}, {}]",
                self.name,
                self.height,
                Self::MIN_HEIGHT,
                Self::FRAME_HEIGHT
            )));
        }
        let expected = 16.0 / 9.0;
        let actual = f64::from(self.width) / f64::from(self.height);
        if (actual - expected).abs() / expected > 0.01 {
            return Err(AppError::BadGeometry(format!(
                "slot '{}' aspect ratio {:.4} deviates from 16:9 by more than 1%",
                self.name, actual
            )));
        }
        Ok(())
    }

    /// Area in pixels, used for the descending z-order sort.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Layout configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A fully-specified layout request, as ingested from `/api/layout/set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub kind: LayoutKind,
    /// slot name -> channel id
    pub slot_to_channel: BTreeMap<String, String>,
    pub audio_slot: String,
    /// slot name -> volume, clamped to [0, 1] on construction.
    pub per_slot_volume: BTreeMap<String, f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_slots: Option<Vec<CustomSlot>>,
}

impl LayoutConfig {
    /// Validates the invariants from §3 and normalizes volumes.
    ///
    /// Does not resolve channel IDs against the catalog — that's the
    /// caller's job (it needs catalog access this type doesn't have).
    pub fn validate(&mut self) -> Result<(), AppError> {
        if self.slot_to_channel.len() > 5 {
            return Err(AppError::BadLayout(
                "at most 5 streams may be composed at once".into(),
            ));
        }

        match self.kind {
            LayoutKind::Custom => {
                let custom_slots = self.custom_slots.as_ref().ok_or_else(|| {
                    AppError::BadLayout("custom layout requires custom_slots".into())
                })?;
                if custom_slots.is_empty() {
                    return Err(AppError::BadLayout(
                        "custom layout requires at least one slot".into(),
                    ));
                }
                let valid_names: std::collections::HashSet<&str> =
                    custom_slots.iter().map(|s| s.name.as_str()).collect();
                for slot in custom_slots {
                    slot.validate()?;
                }
                for slot_name in self.slot_to_channel.keys() {
                    if !valid_names.contains(slot_name.as_str()) {
                        return Err(AppError::BadLayout(format!(
                            "slot '{slot_name}' is not defined in custom_slots"
                        )));
                    }
                }
            }
            kind => {
                let canonical = kind
                    .canonical_slots()
                    .expect("non-custom kinds always have canonical slots");
                for slot_name in self.slot_to_channel.keys() {
                    if !canonical.contains(&slot_name.as_str()) {
                        return Err(AppError::BadLayout(format!(
                            "slot '{slot_name}' is not part of layout kind {kind:?}"
                        )));
                    }
                }
            }
        }

        if !self.slot_to_channel.contains_key(&self.audio_slot) {
            return Err(AppError::BadLayout(format!(
                "audio_slot '{}' is not an assigned slot",
                self.audio_slot
            )));
        }

        for v in self.per_slot_volume.values_mut() {
            *v = clamp_volume(*v);
        }

        Ok(())
    }

    /// Returns slots in the canonical order for this layout's kind, or in
    /// area-descending order for `custom`.
    #[must_use]
    pub fn ordered_slot_names(&self) -> Vec<String> {
        match self.kind {
            LayoutKind::Custom => {
                let mut slots = self.custom_slots.clone().unwrap_or_default();
                slots.sort_by(|a, b| b.area().cmp(&a.area()));
                slots
                    .into_iter()
                    .map(|s| s.name)
                    .filter(|name| self.slot_to_channel.contains_key(name))
                    .collect()
            }
            kind => kind
                .canonical_slots()
                .unwrap_or(&[])
                .iter()
                .filter(|name| self.slot_to_channel.contains_key(**name))
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime state
// ─────────────────────────────────────────────────────────────────────────────

/// The three-state lifecycle of the broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle,
    Starting,
    Live,
}

/// A snapshot of the chosen encoder profile, reported verbatim on status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderProfileInfo {
    pub name: String,
    pub codec: String,
    pub preference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layout() -> LayoutConfig {
        let mut slot_to_channel = BTreeMap::new();
        slot_to_channel.insert("main".to_string(), "chan-a".to_string());
        slot_to_channel.insert("inset".to_string(), "chan-b".to_string());
        LayoutConfig {
            kind: LayoutKind::Pip,
            slot_to_channel,
            audio_slot: "main".to_string(),
            per_slot_volume: BTreeMap::new(),
            custom_slots: None,
        }
    }

    #[test]
    fn pip_ordered_slots_are_canonical() {
        let layout = sample_layout();
        assert_eq!(layout.ordered_slot_names(), vec!["main", "inset"]);
    }

    #[test]
    fn validate_rejects_slot_outside_kind() {
        let mut layout = sample_layout();
        layout.slot_to_channel.insert("bogus".into(), "chan-c".into());
        assert!(layout.validate().is_err());
    }

    #[test]
    fn validate_rejects_audio_slot_not_assigned() {
        let mut layout = sample_layout();
        layout.audio_slot = "inset2".to_string();
        assert!(layout.validate().is_err());
    }

    #[test]
    fn validate_clamps_volumes() {
        let mut layout = sample_layout();
        layout.per_slot_volume.insert("main".into(), 5.0);
        layout.per_slot_volume.insert("inset".into(), -2.0);
        layout.validate().unwrap();
        assert_eq!(layout.per_slot_volume["main"], 1.0);
        assert_eq!(layout.per_slot_volume["inset"], 0.0);
    }

    #[test]
    fn custom_layout_orders_by_descending_area() {
        let mut slot_to_channel = BTreeMap::new();
        slot_to_channel.insert("big".to_string(), "chan-a".to_string());
        slot_to_channel.insert("small".to_string(), "chan-b".to_string());
        let layout = LayoutConfig {
            kind: LayoutKind::Custom,
            slot_to_channel,
            audio_slot: "big".to_string(),
            per_slot_volume: BTreeMap::new(),
            custom_slots: Some(vec![
                CustomSlot {
                    id: "s1".into(),
                    name: "small".into(),
                    x: 1440,
                    y: 780,
                    width: 320,
                    height: 180,
                    border: false,
                },
                CustomSlot {
                    id: "s2".into(),
                    name: "big".into(),
                    x: 0,
                    y: 0,
                    width: 1920,
                    height: 1080,
                    border: false,
                },
            ]),
        };
        assert_eq!(layout.ordered_slot_names(), vec!["big", "small"]);
    }

    #[test]
    fn custom_slot_rejects_bad_aspect_ratio() {
        let slot = CustomSlot {
            id: "s1".into(),
            name: "weird".into(),
            x: 0,
            y: 0,
            width: 400,
            height: 400,
            border: false,
        };
        assert!(matches!(slot.validate(), Err(AppError::BadGeometry(_))));
    }

    #[test]
    fn custom_slot_exact_min_width_is_allowed() {
        let slot = CustomSlot {
            id: "s1".into(),
            name: "small".into(),
            x: 1440,
            y: 780,
            width: 320,
            height: 180,
            border: false,
        };
        assert!(slot.validate().is_ok());
    }
}
