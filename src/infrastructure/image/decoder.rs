//! Downsampling decoder.
//!
//! Reads the header first to learn the source dimensions, picks a
//! power-of-two sample factor from the requested size, then decodes and
//! reduces by that factor.

use std::io::Cursor;

use bytes::Bytes;
use image::ImageReader;
use image::imageops::FilterType;
use tracing::trace;

use crate::domain::entities::{PixelBuffer, RequestedSize};
use crate::domain::errors::ResolveError;

/// Reads source dimensions from the header without decoding pixels.
///
/// # Errors
/// Returns `Decode` if the bytes are not a recognized image format.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), ResolveError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ResolveError::decode(format!("Failed to read header: {e}")))?;

    if reader.format().is_none() {
        return Err(ResolveError::decode("Unrecognized image format"));
    }

    reader
        .into_dimensions()
        .map_err(|e| ResolveError::decode(format!("Failed to read dimensions: {e}")))
}

/// Largest power-of-two factor that keeps half the source at or above the
/// requested size in both axes.
///
/// The search runs on half the source dimensions, so a 1000px source
/// requested at 200px decodes at factor 2 (500px), not 4. A zero in either
/// requested axis means full resolution.
#[must_use]
pub const fn calculate_sample_size(
    source_width: u32,
    source_height: u32,
    requested: RequestedSize,
) -> u32 {
    if requested.is_full() {
        return 1;
    }

    let half_width = source_width / 2;
    let half_height = source_height / 2;
    let mut sample_size = 1;

    while half_width / (sample_size * 2) >= requested.width
        && half_height / (sample_size * 2) >= requested.height
    {
        sample_size *= 2;
    }

    sample_size
}

/// Decodes `bytes`, downsampled for `requested`.
///
/// # Errors
/// Returns `Decode` if the bytes are malformed or in an unsupported format.
pub fn decode(bytes: &[u8], requested: RequestedSize) -> Result<PixelBuffer, ResolveError> {
    let (width, height) = probe_dimensions(bytes)?;
    let sample_size = calculate_sample_size(width, height, requested);

    let image = image::load_from_memory(bytes)
        .map_err(|e| ResolveError::decode(format!("Failed to decode image: {e}")))?;

    let image = if sample_size > 1 {
        image.resize_exact(
            (width / sample_size).max(1),
            (height / sample_size).max(1),
            FilterType::Nearest,
        )
    } else {
        image
    };

    trace!(
        source_width = width,
        source_height = height,
        sample_size,
        width = image.width(),
        height = image.height(),
        "Decoded image"
    );

    Ok(PixelBuffer::new(image))
}

/// Runs [`decode`] on the blocking thread pool.
///
/// # Errors
/// Returns `Decode` on malformed bytes, `Internal` if the decode task panicked.
pub async fn decode_blocking(
    bytes: Bytes,
    requested: RequestedSize,
) -> Result<PixelBuffer, ResolveError> {
    tokio::task::spawn_blocking(move || decode(&bytes, requested))
        .await
        .map_err(|e| ResolveError::internal(format!("Decode task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use crate::infrastructure::image::test_support::png_bytes;
    use test_case::test_case;

    #[test_case(1000, 1000, 200, 200, 2 ; "half_source_meets_request")]
    #[test_case(1000, 1000, 0, 0, 1 ; "zero_means_full")]
    #[test_case(1000, 1000, 0, 200, 1 ; "zero_width_means_full")]
    #[test_case(1000, 1000, 600, 600, 1 ; "request_larger_than_half")]
    #[test_case(1000, 1000, 500, 500, 1 ; "request_equal_to_half")]
    #[test_case(4000, 3000, 100, 100, 8 ; "bounded_by_height")]
    #[test_case(4096, 4096, 1, 1, 2048 ; "tiny_request")]
    #[test_case(1, 1, 1, 1, 1 ; "single_pixel")]
    fn test_sample_size(sw: u32, sh: u32, rw: u32, rh: u32, expected: u32) {
        assert_eq!(
            calculate_sample_size(sw, sh, RequestedSize::new(rw, rh)),
            expected
        );
    }

    #[test]
    fn test_sample_size_properties() {
        for (rw, rh) in [(1, 1), (50, 80), (200, 200), (249, 250), (250, 250), (251, 1)] {
            let s = calculate_sample_size(1000, 1000, RequestedSize::new(rw, rh));
            assert!(s.is_power_of_two());
            if 500 >= rw && 500 >= rh {
                assert!(500 / s >= rw && 500 / s >= rh, "factor {s} for {rw}x{rh}");
                assert!(500 / (s * 2) < rw || 500 / (s * 2) < rh);
            }
        }
    }

    #[test]
    fn test_probe_dimensions() {
        let bytes = png_bytes(320, 240);
        assert_eq!(probe_dimensions(&bytes).ok(), Some((320, 240)));
    }

    #[test]
    fn test_decode_full_resolution() {
        let bytes = png_bytes(500, 500);
        let buffer = decode(&bytes, RequestedSize::FULL).expect("valid png");
        assert_eq!((buffer.width(), buffer.height()), (500, 500));
    }

    #[test]
    fn test_decode_downsampled() {
        let bytes = png_bytes(1000, 1000);
        let buffer = decode(&bytes, RequestedSize::new(200, 200)).expect("valid png");
        assert_eq!((buffer.width(), buffer.height()), (500, 500));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not an image", RequestedSize::FULL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let bytes = png_bytes(64, 64);
        let err = decode(&bytes[..bytes.len() / 2], RequestedSize::FULL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_decode_blocking() {
        let bytes = Bytes::from(png_bytes(40, 30));
        let buffer = decode_blocking(bytes, RequestedSize::FULL)
            .await
            .expect("valid png");
        assert_eq!(buffer.width(), 40);
    }
}
