//! Filter-graph compiler (component C3).
//!
//! A pure function: given a layout kind, ordered inputs, the audio slot,
//! per-slot volumes, and (for `custom`) slot geometries, produces the
//! complete argument vector for the media-processing subprocess. No I/O, no
//! shared state — determinism (§8 invariant 1) follows directly from the
//! function signature.

use std::collections::BTreeMap;

use crate::encoder::EncoderProfile;
use crate::error::AppError;
use crate::state::{CustomSlot, LayoutKind};

const FRAME_W: u32 = 1920;
const FRAME_H: u32 = 1080;
const FPS: u32 = 30;

/// One resolved input to the compiler: a slot name paired with its
/// already-resolved source URL, in canonical/area order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerInput {
    pub slot_name: String,
    pub source_url: String,
}

fn normalize(idx: usize, w: u32, h: u32, out_label: &str) -> String {
    format!(
        "[{idx}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={FPS}[{out_label}]"
    )
}

fn border(in_label: &str, out_label: &str, px: u32) -> String {
    format!(
        "[{in_label}]pad=iw+{double}:ih+{double}:{px}:{px}:color=white[{out_label}]",
        double = px * 2
    )
}

fn overlay(base: &str, top: &str, x: i64, y: i64, out_label: &str) -> String {
    format!("[{base}][{top}]overlay=x={x}:y={y}[{out_label}]")
}

/// Builds the video filter chain, returning filter segments joined by `;`
/// elsewhere, terminating in a `[v]`-labeled output.
fn build_video_chain(
    kind: LayoutKind,
    inputs: &[CompilerInput],
    custom_slots: Option<&[CustomSlot]>,
) -> Result<Vec<String>, AppError> {
    let mut segs = Vec::new();

    match kind {
        LayoutKind::Pip | LayoutKind::DvdPip => {
            segs.push(normalize(0, FRAME_W, FRAME_H, "n0"));
            let (inset_w, inset_h, border_px) = if kind == LayoutKind::Pip {
                (640, 360, 8)
            } else {
                (480, 270, 0)
            };
            segs.push(normalize(1, inset_w, inset_h, "n1raw"));
            let inset_label = if border_px > 0 {
                segs.push(border("n1raw", "n1", border_px));
                "n1"
            } else {
                "n1raw"
            };
            if kind == LayoutKind::Pip {
                let x = i64::from(FRAME_W) - i64::from(inset_w) - 40;
                let y = i64::from(FRAME_H) - i64::from(inset_h) - 40;
                segs.push(overlay("n0", inset_label, x, y, "v"));
            } else {
                // dvd_pip: deterministic triangle-wave bounce at 60 px/s,
                // reflecting off the frame edges with a 40px margin (§4.3,
                // Open Question (b)).
                let margin = 40i64;
                let x_bound = i64::from(FRAME_W) - i64::from(inset_w) - margin;
                let y_bound = i64::from(FRAME_H) - i64::from(inset_h) - margin;
                let speed = 60;
                let x_expr = format!(
                    "{margin}+abs(mod(t*{speed},{span}*2)-{span})",
                    span = x_bound - margin
                );
                let y_expr = format!(
                    "{margin}+abs(mod(t*{speed}*0.73,{span}*2)-{span})",
                    span = y_bound - margin
                );
                segs.push(format!(
                    "[n0][{inset_label}]overlay=x='{x_expr}':y='{y_expr}'[v]"
                ));
            }
        }
        LayoutKind::SplitH => {
            segs.push(normalize(0, 960, 1080, "n0"));
            segs.push(normalize(1, 960, 1080, "n1"));
            segs.push(format!(
                "color=c=black:s={FRAME_W}x{FRAME_H}[canvas];\
[canvas][n0]overlay=x=0:y=0[c0];[c0][n1]overlay=x=960:y=0[v]"
            ));
        }
        LayoutKind::SplitV => {
            segs.push(normalize(0, 1920, 540, "n0"));
            segs.push(normalize(1, 1920, 540, "n1"));
            segs.push(format!(
                "color=c=black:s={FRAME_W}x{FRAME_H}[canvas];\
[canvas][n0]overlay=x=0:y=0[c0];[c0][n1]overlay=x=0:y=540[v]"
            ));
        }
        LayoutKind::Grid2x2 => {
            let positions = [(0, 0), (960, 0), (0, 540), (960, 540)];
            for (i, _) in inputs.iter().enumerate().take(4) {
                segs.push(normalize(i, 960, 540, &format!("n{i}")));
            }
            segs.push(format!("color=c=black:s={FRAME_W}x{FRAME_H}[canvas]"));
            let mut prev = "canvas".to_string();
            for (i, (x, y)) in positions.iter().enumerate().take(inputs.len()) {
                let out = if i == inputs.len() - 1 {
                    "v".to_string()
                } else {
                    format!("c{i}")
                };
                segs.push(overlay(&prev, &format!("n{i}"), *x, *y, &out));
                prev = out;
            }
        }
        LayoutKind::MultiPip2 | LayoutKind::MultiPip3 | LayoutKind::MultiPip4 => {
            segs.push(normalize(0, FRAME_W, FRAME_H, "n0"));
            let inset_count = inputs.len() - 1;
            let (inset_w, inset_h, border_px, gap, margin) = (384u32, 216u32, 4u32, 20i64, 40i64);
            let mut prev = "n0".to_string();
            for i in 0..inset_count {
                let idx = i + 1;
                segs.push(normalize(idx, inset_w, inset_h, &format!("n{idx}raw")));
                segs.push(border(&format!("n{idx}raw"), &format!("n{idx}"), border_px));
                // Arranged bottom edge, right-to-left, 20px gaps, 40px margin.
                let x = i64::from(FRAME_W)
                    - margin
                    - i64::from(inset_w + border_px * 2) * (i as i64 + 1)
                    - gap * i as i64;
                let y = i64::from(FRAME_H) - margin - i64::from(inset_h + border_px * 2);
                let out = if i == inset_count - 1 {
                    "v".to_string()
                } else {
                    format!("c{idx}")
                };
                segs.push(overlay(&prev, &format!("n{idx}"), x, y, &out));
                prev = out;
            }
        }
        LayoutKind::Custom => {
            let slots = custom_slots
                .ok_or_else(|| AppError::BadLayout("custom layout requires custom_slots".into()))?;
            let mut ordered: Vec<&CustomSlot> = slots.iter().collect();
            ordered.sort_by(|a, b| b.area().cmp(&a.area()));

            segs.push(format!("color=c=black:s={FRAME_W}x{FRAME_H}[canvas]"));
            let mut prev = "canvas".to_string();
            for (i, slot) in ordered.iter().enumerate() {
                let Some(input_idx) = inputs.iter().position(|inp| inp.slot_name == slot.name)
                else {
                    continue;
                };
                let raw = format!("n{i}raw");
                segs.push(normalize(input_idx, slot.width, slot.height, &raw));
                let label = if slot.border {
                    let bordered = format!("n{i}");
                    segs.push(border(&raw, &bordered, 4));
                    bordered
                } else {
                    raw
                };
                let out = if i == ordered.len() - 1 {
                    "v".to_string()
                } else {
                    format!("c{i}")
                };
                segs.push(overlay(
                    &prev,
                    &label,
                    i64::from(slot.x),
                    i64::from(slot.y),
                    &out,
                ));
                prev = out;
            }
        }
    }

    Ok(segs)
}

fn build_audio_chain(
    inputs: &[CompilerInput],
    audio_slot: &str,
    volumes: &BTreeMap<String, f32>,
) -> Vec<String> {
    let mut segs = Vec::new();
    let mut mix_labels = Vec::new();
    let mut solo_label: Option<String> = None;

    let nonzero: Vec<&str> = inputs
        .iter()
        .filter(|inp| volumes.get(&inp.slot_name).copied().unwrap_or(0.0) > 0.0)
        .map(|inp| inp.slot_name.as_str())
        .collect();
    let solo_mode = nonzero.len() == 1 && nonzero[0] == audio_slot;

    for (idx, inp) in inputs.iter().enumerate() {
        let vol = volumes.get(&inp.slot_name).copied().unwrap_or(0.0);
        let resampled = format!("ar{idx}");
        segs.push(format!(
            "[{idx}:a]aresample=48000:async=1,aformat=channel_layouts=stereo[{resampled}]"
        ));

        if solo_mode {
            if inp.slot_name == audio_slot {
                segs.push(format!("[{resampled}]volume={vol}[a]"));
                solo_label = Some("a".to_string());
            }
            continue;
        }

        let scaled = format!("av{idx}");
        segs.push(format!("[{resampled}]volume={vol}[{scaled}]"));
        mix_labels.push(scaled);
    }

    if solo_label.is_none() && !mix_labels.is_empty() {
        let inputs_str: String = mix_labels.iter().map(|l| format!("[{l}]")).collect();
        segs.push(format!(
            "{inputs_str}amix=inputs={}:normalize=0[a]",
            mix_labels.len()
        ));
    }

    segs
}

/// Compiles a layout into the complete argument vector for the
/// media-processing subprocess.
pub fn compile(
    kind: LayoutKind,
    inputs: &[CompilerInput],
    audio_slot: &str,
    volumes: &BTreeMap<String, f32>,
    custom_slots: Option<&[CustomSlot]>,
    profile: &EncoderProfile,
) -> Result<Vec<String>, AppError> {
    if inputs.is_empty() {
        return Err(AppError::BadLayout("at least one slot must be assigned".into()));
    }
    if inputs.len() > 5 {
        return Err(AppError::BadLayout(
            "at most 5 streams may be composed at once".into(),
        ));
    }
    if !inputs.iter().any(|inp| inp.slot_name == audio_slot) {
        return Err(AppError::BadLayout(format!(
            "audio_slot '{audio_slot}' is not among the assigned slots"
        )));
    }
    if kind == LayoutKind::Custom && custom_slots.is_none() {
        return Err(AppError::BadLayout("custom layout requires custom_slots".into()));
    }

    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    args.extend(profile.extra_pre_input_args.iter().map(|s| (*s).to_string()));

    for inp in inputs {
        args.extend([
            "-reconnect".to_string(),
            "1".to_string(),
            "-reconnect_streamed".to_string(),
            "1".to_string(),
            "-reconnect_delay_max".to_string(),
            "5".to_string(),
            "-i".to_string(),
            inp.source_url.clone(),
        ]);
    }

    let mut filter_segs = build_video_chain(kind, inputs, custom_slots)?;
    filter_segs.extend(build_audio_chain(inputs, audio_slot, volumes));
    args.push("-filter_complex".to_string());
    args.push(filter_segs.join(";"));

    args.extend([
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "[a]".to_string(),
        "-c:v".to_string(),
        profile.codec.to_string(),
    ]);
    args.extend(profile.extra_output_args.iter().map(|s| (*s).to_string()));
    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-f".to_string(),
        "mpegts".to_string(),
        "pipe:1".to_string(),
    ]);

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn software_profile() -> EncoderProfile {
        crate::encoder::PROFILES
            .iter()
            .find(|p| p.name == "software")
            .cloned()
            .unwrap()
    }

    fn pip_inputs() -> Vec<CompilerInput> {
        vec![
            CompilerInput {
                slot_name: "main".into(),
                source_url: "urlA".into(),
            },
            CompilerInput {
                slot_name: "inset".into(),
                source_url: "urlB".into(),
            },
        ]
    }

    #[test]
    fn compilation_is_deterministic() {
        let profile = software_profile();
        let volumes = BTreeMap::new();
        let a = compile(
            LayoutKind::Pip,
            &pip_inputs(),
            "main",
            &volumes,
            None,
            &profile,
        )
        .unwrap();
        let b = compile(
            LayoutKind::Pip,
            &pip_inputs(),
            "main",
            &volumes,
            None,
            &profile,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn input_order_matches_canonical_slot_order() {
        let profile = software_profile();
        let volumes = BTreeMap::new();
        let args = compile(
            LayoutKind::Pip,
            &pip_inputs(),
            "main",
            &volumes,
            None,
            &profile,
        )
        .unwrap();
        let a_pos = args.iter().position(|s| s == "urlA").unwrap();
        let b_pos = args.iter().position(|s| s == "urlB").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn rejects_unassigned_audio_slot() {
        let profile = software_profile();
        let volumes = BTreeMap::new();
        let err = compile(
            LayoutKind::Pip,
            &pip_inputs(),
            "inset3",
            &volumes,
            None,
            &profile,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadLayout(_)));
    }

    #[test]
    fn rejects_more_than_five_inputs() {
        let profile = software_profile();
        let inputs: Vec<CompilerInput> = (0..6)
            .map(|i| CompilerInput {
                slot_name: format!("slot{i}"),
                source_url: format!("url{i}"),
            })
            .collect();
        let err = compile(
            LayoutKind::Custom,
            &inputs,
            "slot0",
            &BTreeMap::new(),
            Some(&[]),
            &profile,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadLayout(_)));
    }

    #[test]
    fn custom_layout_requires_custom_slots() {
        let profile = software_profile();
        let err = compile(
            LayoutKind::Custom,
            &pip_inputs(),
            "main",
            &BTreeMap::new(),
            None,
            &profile,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadLayout(_)));
    }

    #[test]
    fn volume_clamping_is_reflected_in_compiled_filter() {
        let profile = software_profile();
        let mut volumes = BTreeMap::new();
        // The compiler trusts its input is pre-clamped (state.rs does this
        // on ingest); this test documents that contract by asserting the
        // literal value passed through unchanged.
        volumes.insert("main".to_string(), 0.5);
        volumes.insert("inset".to_string(), 0.5);
        let args = compile(
            LayoutKind::Pip,
            &pip_inputs(),
            "main",
            &volumes,
            None,
            &profile,
        )
        .unwrap();
        let filter_idx = args.iter().position(|s| s == "-filter_complex").unwrap();
        assert!(args[filter_idx + 1].contains("volume=0.5"));
    }
}
