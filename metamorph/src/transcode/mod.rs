//! Media conversion: dispatch by media class to the external encoders.

pub mod command;
pub mod image;
pub mod video;

use std::path::{Path, PathBuf};

use media_probe::MediaKind;

use crate::formats::{ImageFormat, VideoFormat};
use crate::{Error, Result};

/// Paths to the external encoder binaries.
#[derive(Debug, Clone)]
pub struct MediaTools {
    pub ffmpeg_path: String,
    pub toktx_path: String,
}

/// A finished conversion.
#[derive(Debug)]
pub struct ConversionOutput {
    /// Converted file inside the job's work directory.
    pub path: PathBuf,
    /// Textual name of the target that was applied.
    pub format_name: &'static str,
}

impl MediaTools {
    pub fn new(ffmpeg_path: impl Into<String>, toktx_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            toktx_path: toktx_path.into(),
        }
    }

    /// Convert `input` according to its media class. Every intermediate and
    /// the output land inside `work_dir`; the caller owns cleanup.
    pub async fn convert(
        &self,
        kind: MediaKind,
        input: &Path,
        work_dir: &Path,
        image_target: ImageFormat,
        video_target: VideoFormat,
    ) -> Result<ConversionOutput> {
        match kind {
            MediaKind::StaticImage => {
                let png = image::preprocess_still(input, work_dir).await?;
                let path = image::encode_texture(self, &png, work_dir, image_target).await?;
                Ok(ConversionOutput {
                    path,
                    format_name: image_target.name(),
                })
            }
            MediaKind::MotionImage => {
                let frames = image::explode_frames(input, work_dir).await?;
                let path = video::encode_frames(self, &frames, work_dir, video_target).await?;
                Ok(ConversionOutput {
                    path,
                    format_name: video_target.name(),
                })
            }
            MediaKind::MotionVideo => {
                let path = video::encode_video(self, input, work_dir, video_target).await?;
                Ok(ConversionOutput {
                    path,
                    format_name: video_target.name(),
                })
            }
            MediaKind::Other => Err(Error::UnknownFileType),
        }
    }
}
