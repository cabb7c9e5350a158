//! Video encoding via ffmpeg.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::Result;
use crate::formats::VideoFormat;

use super::MediaTools;
use super::command::run_tool;
use super::image::FRAME_RATE;

/// Downscale to 512 px wide, keep aspect, never upscale. `-2` keeps the
/// height even, which yuv420p requires.
const SCALE_FILTER: &str = "scale='min(512,iw)':-2:flags=lanczos";

/// Build the full ffmpeg argument list.
///
/// `frame_input` marks an image-sequence input, which needs an explicit input
/// framerate ahead of `-i`.
pub fn encode_args(input: &Path, output: &Path, target: VideoFormat, frame_input: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
    ];
    if frame_input {
        args.extend(["-framerate".into(), FRAME_RATE.to_string()]);
    }
    args.extend(["-i".into(), input.to_string_lossy().into_owned()]);

    match target {
        VideoFormat::Mp4 => args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-crf".into(),
            "28".into(),
            "-preset".into(),
            "veryfast".into(),
            "-vf".into(),
            SCALE_FILTER.into(),
            "-movflags".into(),
            "+faststart".into(),
        ]),
        VideoFormat::Ogv => args.extend([
            "-c:v".into(),
            "libtheora".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-qscale:v".into(),
            "7".into(),
            "-an".into(),
            "-vf".into(),
            SCALE_FILTER.into(),
            "-f".into(),
            "ogg".into(),
        ]),
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Encode a video (or GIF, which ffmpeg reads natively) straight from a file.
pub async fn encode_video(
    tools: &MediaTools,
    input: &Path,
    work_dir: &Path,
    target: VideoFormat,
) -> Result<PathBuf> {
    let output = work_dir.join(format!("output{}", target.extension()));
    let mut cmd = Command::new(&tools.ffmpeg_path);
    cmd.args(encode_args(input, &output, target, false))
        .env("LC_ALL", "C");
    run_tool("ffmpeg", &mut cmd).await?;
    Ok(output)
}

/// Encode an exploded PNG frame sequence.
pub async fn encode_frames(
    tools: &MediaTools,
    frames_dir: &Path,
    work_dir: &Path,
    target: VideoFormat,
) -> Result<PathBuf> {
    let output = work_dir.join(format!("output{}", target.extension()));
    let pattern = frames_dir.join("frame_%05d.png");
    let mut cmd = Command::new(&tools.ffmpeg_path);
    cmd.args(encode_args(&pattern, &output, target, true))
        .env("LC_ALL", "C");
    run_tool("ffmpeg", &mut cmd).await?;
    Ok(output)
}
