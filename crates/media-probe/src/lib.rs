//! Media classification from file headers.
//!
//! Classifies a byte prefix (at most [`SNIFF_LEN`] bytes) into the coarse
//! classes the conversion pipeline cares about, without touching the rest of
//! the file. Classification is purely signature-based; containers that need a
//! closer look (WebP animation chunks, ISO-BMFF brands) are inspected within
//! the same prefix.

/// Number of leading bytes the classifier needs at most.
pub const SNIFF_LEN: usize = 4096;

/// Coarse media class driving pipeline dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// A still image, encoded to a texture container.
    StaticImage,
    /// An animated image whose frames must be extracted before video encoding.
    MotionImage,
    /// A video (or a format the video encoder consumes natively, e.g. GIF).
    MotionVideo,
    /// Nothing we recognize.
    Other,
}

impl MediaKind {
    /// Whether the class has a conversion path at all.
    pub fn is_convertible(self) -> bool {
        !matches!(self, MediaKind::Other)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MediaKind::StaticImage => "StaticImage",
            MediaKind::MotionImage => "MotionImage",
            MediaKind::MotionVideo => "MotionVideo",
            MediaKind::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Classify a file from its leading bytes.
///
/// `header` should hold up to [`SNIFF_LEN`] bytes; shorter slices are fine and
/// simply match fewer signatures.
pub fn classify(header: &[u8]) -> MediaKind {
    // GIF goes straight to the video encoder, which reads it natively.
    if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        return MediaKind::MotionVideo;
    }

    if is_riff(header, b"WEBP") {
        return if has_webp_animation(header) {
            MediaKind::MotionImage
        } else {
            MediaKind::StaticImage
        };
    }

    if header.starts_with(b"\x89PNG\r\n\x1a\n")
        || header.starts_with(b"\xff\xd8\xff")
        || header.starts_with(b"<svg ")
        || header.starts_with(b"BM")
        || header.starts_with(b"II*\x00")
        || header.starts_with(b"MM\x00*")
    {
        return MediaKind::StaticImage;
    }

    if let Some(brand) = isobmff_brand(header) {
        return match &brand {
            b"avif" | b"heic" | b"heix" | b"mif1" => MediaKind::StaticImage,
            _ => MediaKind::MotionVideo,
        };
    }

    // Matroska/WebM, Ogg, AVI, FLV, MPEG-PS.
    if header.starts_with(b"\x1a\x45\xdf\xa3")
        || header.starts_with(b"OggS")
        || is_riff(header, b"AVI ")
        || header.starts_with(b"FLV\x01")
        || header.starts_with(b"\x00\x00\x01\xba")
    {
        return MediaKind::MotionVideo;
    }

    MediaKind::Other
}

fn is_riff(header: &[u8], form: &[u8; 4]) -> bool {
    header.len() >= 12 && header.starts_with(b"RIFF") && &header[8..12] == form
}

/// Major brand of an ISO-BMFF container, if the header looks like one.
fn isobmff_brand(header: &[u8]) -> Option<[u8; 4]> {
    if header.len() < 12 || &header[4..8] != b"ftyp" {
        return None;
    }
    let mut brand = [0u8; 4];
    brand.copy_from_slice(&header[8..12]);
    Some(brand)
}

/// Look for an `ANIM` or `ANMF` chunk inside the sniffed window.
///
/// The chunk directory of an animated WebP appears right after the VP8X
/// header, so a flat scan of the prefix is sufficient.
fn has_webp_animation(header: &[u8]) -> bool {
    header
        .windows(4)
        .any(|w| w == b"ANIM" || w == b"ANMF")
}
