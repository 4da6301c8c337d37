//! Encoder probe (component C2).
//!
//! At startup, picks one codec profile from a static, priority-ordered
//! table by running a short test invocation per candidate.

use std::time::Duration;

use tokio::process::Command;

use crate::protocol_constants::ENCODER_PROBE_TIMEOUT_SECS;

/// A named bundle of codec arguments, selected once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderProfile {
    pub name: &'static str,
    pub codec: &'static str,
    pub extra_pre_input_args: &'static [&'static str],
    pub extra_output_args: &'static [&'static str],
    pub supports_hw_filter: bool,
}

/// Fixed-priority candidate list: three hardware profiles, then software.
pub const PROFILES: &[EncoderProfile] = &[
    EncoderProfile {
        name: "vaapi",
        codec: "h264_vaapi",
        extra_pre_input_args: &["-hwaccel", "vaapi", "-hwaccel_output_format", "vaapi"],
        extra_output_args: &[],
        supports_hw_filter: true,
    },
    EncoderProfile {
        name: "nvenc",
        codec: "h264_nvenc",
        extra_pre_input_args: &["-hwaccel", "cuda"],
        extra_output_args: &[],
        supports_hw_filter: true,
    },
    EncoderProfile {
        name: "videotoolbox",
        codec: "h264_videotoolbox",
        extra_pre_input_args: &["-hwaccel", "videotoolbox"],
        extra_output_args: &[],
        supports_hw_filter: true,
    },
    EncoderProfile {
        name: "software",
        codec: "libx264",
        extra_pre_input_args: &[],
        extra_output_args: &["-preset", "veryfast"],
        supports_hw_filter: false,
    },
];

fn software_profile() -> &'static EncoderProfile {
    PROFILES
        .iter()
        .find(|p| p.name == "software")
        .expect("software profile is always present")
}

fn find_named(name: &str) -> Option<&'static EncoderProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

/// Runs a short synthetic-source test encode for `profile`, returning `true`
/// on a clean exit.
async fn probe(ffmpeg_binary: &str, profile: &EncoderProfile) -> bool {
    let mut cmd = Command::new(ffmpeg_binary);
    cmd.args(profile.extra_pre_input_args)
        .args(["-f", "lavfi", "-i", "testsrc=size=320x240:rate=5"])
        .args(["-frames:v", "1", "-c:v", profile.codec, "-f", "null", "-"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    let timeout = Duration::from_secs(ENCODER_PROBE_TIMEOUT_SECS);
    match tokio::time::timeout(timeout, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        _ => false,
    }
}

/// Selects an encoder profile.
///
/// `preference` is the `ENCODER_PREFERENCE` environment value: `"auto"`
/// (or anything unrecognized) probes the full priority list; `"cpu"` forces
/// [`PROFILES`]'s software entry directly; any other value is treated as a
/// requested profile name, falling back to software if that profile fails
/// its probe.
pub async fn select_profile(ffmpeg_binary: &str, preference: &str) -> &'static EncoderProfile {
    match preference {
        "cpu" => software_profile(),
        "auto" => probe_priority_list(ffmpeg_binary).await,
        name => match find_named(name) {
            Some(profile) if profile.name == "software" || probe(ffmpeg_binary, profile).await => {
                profile
            }
            Some(_) => software_profile(),
            None => {
                log::warn!(
                    "[Encoder] unrecognized ENCODER_PREFERENCE '{name}', falling back to auto probing"
                );
                probe_priority_list(ffmpeg_binary).await
            }
        },
    }
}

/// Probes [`PROFILES`] in priority order, returning the first hardware
/// profile that passes, or software if none do.
async fn probe_priority_list(ffmpeg_binary: &str) -> &'static EncoderProfile {
    for profile in PROFILES {
        if profile.name == "software" {
            return profile;
        }
        if probe(ffmpeg_binary, profile).await {
            return profile;
        }
    }
    software_profile()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_profile_is_last_priority() {
        assert_eq!(PROFILES.last().unwrap().name, "software");
        assert!(!PROFILES.last().unwrap().supports_hw_filter);
    }

    #[test]
    fn all_profile_names_are_unique() {
        let mut names: Vec<&str> = PROFILES.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PROFILES.len());
    }

    #[tokio::test]
    async fn cpu_preference_forces_software_without_probing() {
        // Uses a binary name that can't possibly exist; if this returned
        // anything but software without probing, this test would hang on
        // the probe's timeout instead of returning immediately.
        let profile = select_profile("definitely-not-a-real-binary", "cpu").await;
        assert_eq!(profile.name, "software");
    }
}
