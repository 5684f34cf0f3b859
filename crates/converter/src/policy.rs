//! Retry escalation policy
//!
//! Maps a retry level and the hardware-acceleration toggle to a concrete
//! ffmpeg parameter set. Each level is more permissive than the previous one
//! and trades quality for a better chance of getting a playable file out of a
//! damaged source.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Demuxer analysis window used by the tolerant levels
const WIDE_PROBE: &str = "20M";

/// Flags that keep ffmpeg going over corrupt packets and broken timestamps
const ERROR_TOLERANCE: &[&str] = &["-err_detect", "ignore_err", "-fflags", "+genpts+discardcorrupt"];

/// Escalation level of a job, ordered from strict to most permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RetryLevel {
    /// First attempt: strict demuxing, high quality.
    #[default]
    Standard,
    /// Wider probe window, balanced quality, error tolerance.
    Tolerant,
    /// Fastest/lowest quality tier, most compatible profile.
    Salvage,
}

impl RetryLevel {
    pub const ALL: [RetryLevel; 3] = [RetryLevel::Standard, RetryLevel::Tolerant, RetryLevel::Salvage];

    pub fn as_u8(self) -> u8 {
        match self {
            RetryLevel::Standard => 0,
            RetryLevel::Tolerant => 1,
            RetryLevel::Salvage => 2,
        }
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(RetryLevel::Standard),
            1 => Some(RetryLevel::Tolerant),
            2 => Some(RetryLevel::Salvage),
            _ => None,
        }
    }

    /// The next, more permissive level (saturates at the last one)
    pub fn next(self) -> Self {
        match self {
            RetryLevel::Standard => RetryLevel::Tolerant,
            RetryLevel::Tolerant | RetryLevel::Salvage => RetryLevel::Salvage,
        }
    }

    /// Output file-name suffix, empty at level 0
    pub fn file_suffix(self) -> &'static str {
        match self {
            RetryLevel::Standard => "",
            RetryLevel::Tolerant => "_retry1",
            RetryLevel::Salvage => "_retry2",
        }
    }

    /// Annotation appended to display labels, e.g. `movie.mkv (Level 1)`
    pub fn label_suffix(self) -> &'static str {
        match self {
            RetryLevel::Standard => "",
            RetryLevel::Tolerant => " (Level 1)",
            RetryLevel::Salvage => " (Level 2)",
        }
    }

    /// Prefix put in front of failure reasons
    pub fn error_prefix(self) -> &'static str {
        match self {
            RetryLevel::Standard => "",
            RetryLevel::Tolerant => "(Retry Level 1) ",
            RetryLevel::Salvage => "(Retry Level 2) ",
        }
    }

    /// Level a failure reason was recorded at, read back from its prefix
    pub fn of_failure(reason: &str) -> Self {
        [RetryLevel::Salvage, RetryLevel::Tolerant]
            .into_iter()
            .find(|level| reason.starts_with(level.error_prefix()))
            .unwrap_or(RetryLevel::Standard)
    }
}

impl fmt::Display for RetryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {}", self.as_u8())
    }
}

/// Video codec family selected by the hardware-acceleration toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Libx264,
    H264Nvenc,
}

impl VideoCodec {
    pub fn name(self) -> &'static str {
        match self {
            VideoCodec::Libx264 => "libx264",
            VideoCodec::H264Nvenc => "h264_nvenc",
        }
    }
}

/// Concrete encoder parameter set for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    pub level: RetryLevel,
    pub codec: VideoCodec,
    /// Flags placed before `-i`
    pub input_args: Vec<&'static str>,
    /// Video codec arguments
    pub video_args: Vec<&'static str>,
    pub audio_bitrate: &'static str,
    pub error_tolerance: bool,
}

/// Build the profile for a retry level
pub fn profile_for(level: RetryLevel, hardware_accel: bool) -> EncoderProfile {
    let input_args = match level {
        RetryLevel::Standard => Vec::new(),
        RetryLevel::Tolerant | RetryLevel::Salvage => {
            vec!["-analyzeduration", WIDE_PROBE, "-probesize", WIDE_PROBE]
        }
    };

    let (codec, video_args) = if hardware_accel {
        let tier: [&'static str; 4] = match level {
            RetryLevel::Standard => ["-preset", "p5", "-cq", "23"],
            RetryLevel::Tolerant => ["-preset", "p4", "-cq", "25"],
            RetryLevel::Salvage => ["-preset", "p1", "-cq", "28"],
        };
        let mut args = vec!["-c:v", "h264_nvenc", "-pix_fmt", "yuv420p"];
        args.extend(tier);
        (VideoCodec::H264Nvenc, args)
    } else {
        let args = match level {
            RetryLevel::Standard => vec!["-c:v", "libx264", "-profile:v", "high"],
            RetryLevel::Tolerant => vec![
                "-c:v", "libx264", "-profile:v", "main", "-preset", "medium", "-crf", "23",
                "-pix_fmt", "yuv420p",
            ],
            RetryLevel::Salvage => vec![
                "-c:v", "libx264", "-profile:v", "baseline", "-preset", "ultrafast", "-crf",
                "28", "-pix_fmt", "yuv420p",
            ],
        };
        (VideoCodec::Libx264, args)
    };

    let audio_bitrate = match level {
        RetryLevel::Standard => "192k",
        RetryLevel::Tolerant => "128k",
        RetryLevel::Salvage => "96k",
    };

    EncoderProfile {
        level,
        codec,
        input_args,
        video_args,
        audio_bitrate,
        error_tolerance: level != RetryLevel::Standard,
    }
}

/// Compute the output path for an input at a given level
///
/// `/media/movie.mkv` -> `/media/movie.mp4`, `/media/movie_retry1.mp4`, ...
pub fn output_path_for(input: &Path, level: RetryLevel) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let mut name = stem;
    name.push(level.file_suffix());
    name.push(".mp4");
    input.with_file_name(name)
}

/// All output names a source could have produced, one per level
pub fn candidate_outputs(input: &Path) -> Vec<PathBuf> {
    RetryLevel::ALL
        .iter()
        .map(|&level| output_path_for(input, level))
        .collect()
}

impl EncoderProfile {
    /// Full ffmpeg argument list (program name excluded)
    pub fn build_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        args.extend(self.input_args.iter().map(OsString::from));
        args.push("-i".into());
        args.push(input.as_os_str().to_os_string());
        args.extend(self.video_args.iter().map(OsString::from));
        args.push("-c:a".into());
        args.push("aac".into());
        args.push("-b:a".into());
        args.push(self.audio_bitrate.into());
        if self.error_tolerance {
            args.extend(ERROR_TOLERANCE.iter().map(OsString::from));
        }
        args.push("-y".into());
        args.push(output.as_os_str().to_os_string());
        args
    }
}
