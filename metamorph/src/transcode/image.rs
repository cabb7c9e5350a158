//! Still-image preprocessing and texture encoding.

use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::AnimationDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::FilterType;
use tokio::process::Command;
use tracing::debug;

use crate::formats::ImageFormat;
use crate::{Error, Result};

use super::MediaTools;
use super::command::run_tool;

/// Longest edge of a preprocessed still image.
const MAX_EDGE: u32 = 1024;

/// Input framerate assumed for exploded animation frames.
pub const FRAME_RATE: u32 = 10;

/// toktx flags for a texture target, ahead of the output and input paths.
pub fn toktx_args(target: ImageFormat) -> Vec<&'static str> {
    match target {
        ImageFormat::Uastc => vec![
            "--t2",
            "--uastc",
            "--genmipmap",
            "--zcmp",
            "3",
            "--lower_left_maps_to_s0t0",
            "--assign_oetf",
            "srgb",
        ],
        ImageFormat::Astc => vec![
            "--t2",
            "--encode",
            "astc",
            "--astc_blk_d",
            "8x8",
            "--genmipmap",
            "--assign_oetf",
            "srgb",
        ],
        ImageFormat::AstcHigh => vec![
            "--t2",
            "--encode",
            "astc",
            "--astc_blk_d",
            "4x4",
            "--genmipmap",
            "--assign_oetf",
            "srgb",
        ],
    }
}

/// Decode, fit inside 1024x1024 without upscaling, re-encode as lossless PNG.
pub async fn preprocess_still(input: &Path, work_dir: &Path) -> Result<PathBuf> {
    let input = input.to_path_buf();
    let output = work_dir.join("preprocessed.png");
    let png_path = output.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let decoded = image::ImageReader::open(&input)?
            .with_guessed_format()?
            .decode()?;
        let fitted = if decoded.width() > MAX_EDGE || decoded.height() > MAX_EDGE {
            decoded.resize(MAX_EDGE, MAX_EDGE, FilterType::Lanczos3)
        } else {
            decoded
        };
        fitted.save_with_format(&png_path, image::ImageFormat::Png)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::other(format!("image preprocessing panicked: {e}")))??;

    Ok(output)
}

/// Encode a preprocessed PNG into a KTX2 texture.
pub async fn encode_texture(
    tools: &MediaTools,
    png: &Path,
    work_dir: &Path,
    target: ImageFormat,
) -> Result<PathBuf> {
    let output = work_dir.join("output.ktx2");
    let mut cmd = Command::new(&tools.toktx_path);
    cmd.args(toktx_args(target)).arg(&output).arg(png);
    run_tool("toktx", &mut cmd).await?;
    Ok(output)
}

/// Explode an animated image into complete PNG frames under
/// `work_dir/frames`, coalescing per-frame deltas onto a persistent canvas.
pub async fn explode_frames(input: &Path, work_dir: &Path) -> Result<PathBuf> {
    let frames_dir = work_dir.join("frames");
    tokio::fs::create_dir_all(&frames_dir).await?;

    let input = input.to_path_buf();
    let frames = tokio::task::spawn_blocking(move || -> Result<Vec<image::RgbaImage>> {
        let file = std::fs::File::open(&input)?;
        let decoder = WebPDecoder::new(BufReader::new(file))?;
        let (width, height) = image::ImageDecoder::dimensions(&decoder);

        let mut canvas = image::RgbaImage::new(width, height);
        let mut composed = Vec::new();
        for frame in decoder.into_frames() {
            let frame = frame?;
            image::imageops::overlay(
                &mut canvas,
                frame.buffer(),
                i64::from(frame.left()),
                i64::from(frame.top()),
            );
            composed.push(canvas.clone());
        }
        Ok(composed)
    })
    .await
    .map_err(|e| Error::other(format!("frame decoding panicked: {e}")))??;

    if frames.is_empty() {
        return Err(Error::other("animated input decoded to zero frames"));
    }
    debug!(count = frames.len(), "exploding animation frames");

    // Frames are independent; write them concurrently.
    let writes = frames.into_iter().enumerate().map(|(index, frame)| {
        let path = frames_dir.join(format!("frame_{index:05}.png"));
        tokio::task::spawn_blocking(move || frame.save_with_format(&path, image::ImageFormat::Png))
    });
    for write in futures::future::join_all(writes).await {
        write.map_err(|e| Error::other(format!("frame write panicked: {e}")))??;
    }

    Ok(frames_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uastc_flags() {
        assert_eq!(
            toktx_args(ImageFormat::Uastc),
            [
                "--t2",
                "--uastc",
                "--genmipmap",
                "--zcmp",
                "3",
                "--lower_left_maps_to_s0t0",
                "--assign_oetf",
                "srgb"
            ]
        );
    }

    #[test]
    fn astc_block_sizes_differ_by_quality() {
        let astc = toktx_args(ImageFormat::Astc);
        let high = toktx_args(ImageFormat::AstcHigh);
        assert!(astc.windows(2).any(|w| w == ["--astc_blk_d", "8x8"]));
        assert!(high.windows(2).any(|w| w == ["--astc_blk_d", "4x4"]));
        assert!(astc.contains(&"--encode"));
        assert!(!astc.contains(&"--uastc"));
    }

    #[tokio::test]
    async fn preprocess_downscales_but_never_upscales() {
        let work = tempfile::tempdir().unwrap();

        let large = image::DynamicImage::new_rgb8(2048, 1024);
        let large_path = work.path().join("large.src");
        large
            .save_with_format(&work.path().join("large.png"), image::ImageFormat::Png)
            .unwrap();
        std::fs::rename(work.path().join("large.png"), &large_path).unwrap();

        let out = preprocess_still(&large_path, work.path()).await.unwrap();
        let reopened = image::open(&out).unwrap();
        assert_eq!((reopened.width(), reopened.height()), (1024, 512));

        let small = image::DynamicImage::new_rgb8(64, 48);
        let small_path = work.path().join("small.src");
        small
            .save_with_format(&work.path().join("small.png"), image::ImageFormat::Png)
            .unwrap();
        std::fs::rename(work.path().join("small.png"), &small_path).unwrap();

        let out = preprocess_still(&small_path, work.path()).await.unwrap();
        let reopened = image::open(&out).unwrap();
        assert_eq!((reopened.width(), reopened.height()), (64, 48));
    }

    #[tokio::test]
    async fn preprocess_rejects_undecodable_input() {
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("noise.src");
        std::fs::write(&path, b"\x00\x01\x02\x03 definitely not an image").unwrap();
        assert!(preprocess_still(&path, work.path()).await.is_err());
    }
}
