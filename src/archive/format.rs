//! Image format sniffing and the validation hook used during extraction.

/// Image formats recognised by their leading magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// Detect the format from the first bytes of an image.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if data.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
            Some(ImageFormat::Tiff)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Tiff => "image/tiff",
        }
    }
}

/// Decode step run on extracted bytes; a rejection surfaces as
/// [`Error::InvalidImageData`](crate::Error::InvalidImageData).
pub trait ImageValidator: Send + Sync {
    fn validate(&self, data: &[u8]) -> Result<(), String>;
}

impl<F> ImageValidator for F
where
    F: Fn(&[u8]) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, data: &[u8]) -> Result<(), String> {
        self(data)
    }
}

/// Accepts anything whose magic bytes match a known image format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicBytesValidator;

impl ImageValidator for MagicBytesValidator {
    fn validate(&self, data: &[u8]) -> Result<(), String> {
        match ImageFormat::sniff(data) {
            Some(_) => Ok(()),
            None if data.is_empty() => Err("empty image".to_string()),
            None => Err("unrecognised image signature".to_string()),
        }
    }
}

/// Accepts any bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidation;

impl ImageValidator for NoValidation {
    fn validate(&self, _data: &[u8]) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(ImageFormat::sniff(b"\xFF\xD8\xFF\xE0rest"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"\x89PNG\r\n\x1a\n...."), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"BM\0\0"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::sniff(b"II*\0"), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WAVE"), None);
        assert_eq!(ImageFormat::sniff(b"hello"), None);
        assert_eq!(ImageFormat::Webp.mime_type(), "image/webp");
    }

    #[test]
    fn test_magic_bytes_validator() {
        assert!(MagicBytesValidator.validate(b"\x89PNG\r\n\x1a\n").is_ok());
        assert!(MagicBytesValidator.validate(b"").is_err());
        assert!(MagicBytesValidator.validate(b"not an image").is_err());
    }

    #[test]
    fn test_closure_validator() {
        let min_len = |data: &[u8]| {
            if data.len() >= 4 {
                Ok(())
            } else {
                Err(format!("only {} bytes", data.len()))
            }
        };
        assert!(min_len.validate(b"abcd").is_ok());
        assert_eq!(min_len.validate(b"ab").unwrap_err(), "only 2 bytes");
    }
}
