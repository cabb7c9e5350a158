//! Conversion target formats.
//!
//! A conversion request always carries one image target and one video target;
//! which of the two applies is decided later, once the source's media class is
//! known. On the wire (queue messages) both enums travel as small integers.

use serde::{Deserialize, Serialize};

/// Texture-container target for still images.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ImageFormat {
    /// UASTC, the universal default.
    #[default]
    Uastc,
    /// ASTC with 8x8 blocks.
    Astc,
    /// ASTC with 4x4 blocks (higher quality, larger output).
    AstcHigh,
}

impl ImageFormat {
    /// Textual name, used in cache keys and query parameters.
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Uastc => "UASTC",
            ImageFormat::Astc => "ASTC",
            ImageFormat::AstcHigh => "ASTC_HIGH",
        }
    }

    /// Output file extension for this target.
    pub fn extension(self) -> &'static str {
        ".ktx2"
    }
}

impl From<ImageFormat> for u8 {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Uastc => 0,
            ImageFormat::Astc => 1,
            ImageFormat::AstcHigh => 2,
        }
    }
}

impl TryFrom<u8> for ImageFormat {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ImageFormat::Uastc),
            1 => Ok(ImageFormat::Astc),
            2 => Ok(ImageFormat::AstcHigh),
            other => Err(format!("unknown image format discriminant {other}")),
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("UASTC") {
            Ok(ImageFormat::Uastc)
        } else if s.eq_ignore_ascii_case("ASTC") {
            Ok(ImageFormat::Astc)
        } else if s.eq_ignore_ascii_case("ASTC_HIGH") {
            Ok(ImageFormat::AstcHigh)
        } else {
            Err(format!("unknown image format {s:?}"))
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Video-container target for motion inputs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum VideoFormat {
    /// H.264 in MP4, the web default.
    #[default]
    Mp4,
    /// Theora in Ogg.
    Ogv,
}

impl VideoFormat {
    /// Textual name, used in cache keys and query parameters.
    pub fn name(self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "MP4",
            VideoFormat::Ogv => "OGV",
        }
    }

    /// Output file extension for this target.
    pub fn extension(self) -> &'static str {
        match self {
            VideoFormat::Mp4 => ".mp4",
            VideoFormat::Ogv => ".ogv",
        }
    }
}

impl From<VideoFormat> for u8 {
    fn from(format: VideoFormat) -> Self {
        match format {
            VideoFormat::Mp4 => 0,
            VideoFormat::Ogv => 1,
        }
    }
}

impl TryFrom<u8> for VideoFormat {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(VideoFormat::Mp4),
            1 => Ok(VideoFormat::Ogv),
            other => Err(format!("unknown video format discriminant {other}")),
        }
    }
}

impl std::str::FromStr for VideoFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("MP4") {
            Ok(VideoFormat::Mp4)
        } else if s.eq_ignore_ascii_case("OGV") {
            Ok(VideoFormat::Ogv)
        } else {
            Err(format!("unknown video format {s:?}"))
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_format_names() {
        assert_eq!(ImageFormat::Uastc.name(), "UASTC");
        assert_eq!(ImageFormat::Astc.name(), "ASTC");
        assert_eq!(ImageFormat::AstcHigh.name(), "ASTC_HIGH");
    }

    #[test]
    fn wire_discriminants_are_stable() {
        assert_eq!(u8::from(ImageFormat::Uastc), 0);
        assert_eq!(u8::from(ImageFormat::Astc), 1);
        assert_eq!(u8::from(ImageFormat::AstcHigh), 2);
        assert_eq!(u8::from(VideoFormat::Mp4), 0);
        assert_eq!(u8::from(VideoFormat::Ogv), 1);
    }

    #[test]
    fn wire_roundtrip() {
        for format in [ImageFormat::Uastc, ImageFormat::Astc, ImageFormat::AstcHigh] {
            assert_eq!(ImageFormat::try_from(u8::from(format)).unwrap(), format);
        }
        for format in [VideoFormat::Mp4, VideoFormat::Ogv] {
            assert_eq!(VideoFormat::try_from(u8::from(format)).unwrap(), format);
        }
        assert!(ImageFormat::try_from(7).is_err());
        assert!(VideoFormat::try_from(7).is_err());
    }

    #[test]
    fn serde_encodes_as_integers() {
        assert_eq!(serde_json::to_string(&ImageFormat::AstcHigh).unwrap(), "2");
        assert_eq!(serde_json::to_string(&VideoFormat::Ogv).unwrap(), "1");
        assert_eq!(
            serde_json::from_str::<ImageFormat>("1").unwrap(),
            ImageFormat::Astc
        );
    }

    #[test]
    fn parses_query_parameter_names() {
        assert_eq!("UASTC".parse::<ImageFormat>().unwrap(), ImageFormat::Uastc);
        assert_eq!("astc_high".parse::<ImageFormat>().unwrap(), ImageFormat::AstcHigh);
        assert_eq!("ogv".parse::<VideoFormat>().unwrap(), VideoFormat::Ogv);
        assert!("webp".parse::<ImageFormat>().is_err());
        assert!("avi".parse::<VideoFormat>().is_err());
    }

    #[test]
    fn extensions() {
        assert_eq!(ImageFormat::Astc.extension(), ".ktx2");
        assert_eq!(VideoFormat::Mp4.extension(), ".mp4");
        assert_eq!(VideoFormat::Ogv.extension(), ".ogv");
    }
}
