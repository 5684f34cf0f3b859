//! Fake ffmpeg/ffprobe scripts for driver and orchestrator tests.
//!
//! The fake ffmpeg picks its behaviour from the input file name:
//! `*broken*` exits 2 after some noise, `*long*` runs for ~30s writing a
//! partial output, `*medium*` succeeds after about a second, `*tiny*`
//! succeeds with a few bytes of output, anything else succeeds with 64 KiB.
//! Every invocation records its pid and arguments next to the scripts.

use crate::startup::ToolPaths;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// Serialises tests that write and exec scripts (avoids ETXTBSY races)
pub(crate) static PROCESS_LOCK: Mutex<()> = Mutex::const_new(());

const FAKE_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "ffmpeg version n6.1-3-g0123abc Copyright (c) 2000-2023 the FFmpeg developers"
  exit 0
fi
echo $$ > "@DIR@/ffmpeg.pid"
printf '%s\n' "$*" >> "@DIR@/ffmpeg.args"
input=""
prev=""
out=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
  out="$arg"
done
name=$(basename "$input")
echo "ffmpeg version n6.1-3-g0123abc" >&2
case "$name" in
  *broken*)
    i=0
    while [ $i -le 7 ]; do echo "noise line $i" >&2; i=$((i+1)); done
    echo "$input: Invalid data found when processing input" >&2
    exit 2
    ;;
  *long*)
    echo partial > "$out"
    i=0
    while [ $i -lt 600 ]; do
      printf 'frame=%d fps=25 time=00:00:01.00 bitrate=1.0kbits/s\r' "$i" >&2
      sleep 0.05
      i=$((i+1))
    done
    exit 0
    ;;
  *medium*)
    sleep 1
    ;;
esac
for t in 02 05 10; do
  printf 'frame=10 fps=25 time=00:00:%s.00 bitrate=1.0kbits/s\r' "$t" >&2
done
printf '\n' >&2
case "$name" in
  *tiny*) echo small > "$out" ;;
  *) dd if=/dev/zero of="$out" bs=1024 count=64 2>/dev/null ;;
esac
exit 0
"#;

const FAKE_FFPROBE: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "ffprobe version n6.1-3-g0123abc Copyright (c) 2007-2023 the FFmpeg developers"
  exit 0
fi
echo "10.000000"
"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod script");
}

/// Write fake tools into `dir` and return their paths
pub(crate) fn fake_tools(dir: &Path) -> ToolPaths {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).expect("create bin dir");
    let ffmpeg = bin.join("ffmpeg");
    let ffprobe = bin.join("ffprobe");
    write_script(&ffmpeg, &FAKE_FFMPEG.replace("@DIR@", &bin.to_string_lossy()));
    write_script(&ffprobe, FAKE_FFPROBE);
    ToolPaths { ffmpeg, ffprobe }
}

/// Arguments of every fake ffmpeg invocation so far, one line per run
pub(crate) fn recorded_args(tools: &ToolPaths) -> Vec<String> {
    let log = tools
        .ffmpeg
        .parent()
        .map(|p| p.join("ffmpeg.args"))
        .unwrap_or_else(|| PathBuf::from("ffmpeg.args"));
    fs::read_to_string(log)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

pub(crate) fn pid_file(tools: &ToolPaths) -> PathBuf {
    tools
        .ffmpeg
        .parent()
        .map(|p| p.join("ffmpeg.pid"))
        .unwrap_or_else(|| PathBuf::from("ffmpeg.pid"))
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Wait until the fake ffmpeg has written its pid
pub(crate) async fn wait_for_pid(path: &Path) -> u32 {
    wait_until(|| read_pid(path).is_some()).await;
    read_pid(path).expect("pid written")
}

/// Poll `cond` every 20ms, panicking after 10s
pub(crate) async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within 10s");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
