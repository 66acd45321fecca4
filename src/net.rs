/// Network fetch and the re-encode pipeline
///
/// Everything an image goes through between the wire and the caches lives
/// here: the blocking HTTP fetch, downsampling to the display target, and the
/// iterative JPEG quality compression that keeps cached files small.
use crate::error::LoadError;
use crate::photo::Photo;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use log::debug;
use std::io::Read;
use std::time::Duration;

/// Connect/read timeout for image downloads
pub const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(4);

/// Connect/read timeout for the metadata JSON fetch
pub const METADATA_FETCH_TIMEOUT: Duration = Duration::from_millis(2500);

/// Encoded cache files should stay at or under this size
pub const ENCODED_SIZE_BUDGET: usize = 50 * 1024;

const INITIAL_QUALITY: u8 = 50;
const QUALITY_STEP: u8 = 10;
/// Hard stop for the quality loop. The loop must terminate here even when an
/// image cannot be squeezed under the budget (a 1x1 image already can't
/// shrink further).
const QUALITY_FLOOR: u8 = 10;

/// Byte-fetching seam of the loader. Production uses [`HttpFetcher`]; tests
/// substitute counting or failing implementations.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

/// Blocking HTTP GET with bounded timeouts; a single failure surfaces as an
/// error, there is no retry.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        HttpFetcher { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(IMAGE_FETCH_TIMEOUT)
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| LoadError::network(url, e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| LoadError::network(url, e))?;
        debug!("fetched {} ({} bytes)", url, bytes.len());
        Ok(bytes)
    }
}

/// Fetch and parse the feed metadata: a JSON array of
/// `{author, width, height, download_url}` objects. Consumed by the UI
/// layer, not by the cache core.
pub fn fetch_photo_list(json_url: &str) -> Result<Vec<Photo>, LoadError> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(METADATA_FETCH_TIMEOUT)
        .timeout_read(METADATA_FETCH_TIMEOUT)
        .build();
    let body = agent
        .get(json_url)
        .call()
        .map_err(|e| LoadError::network(json_url, e))?
        .into_string()
        .map_err(|e| LoadError::network(json_url, e))?;
    let photos: Vec<Photo> =
        serde_json::from_str(&body).map_err(|e| LoadError::Decode(e.to_string()))?;
    debug!("metadata fetch: {} photos", photos.len());
    Ok(photos)
}

/// Largest power-of-two downsample factor that keeps both scaled dimensions
/// at or above the target. Never downsamples below the target.
pub fn sample_factor(width: u32, height: u32, target_width: u32, target_height: u32) -> u32 {
    let target_width = target_width.max(1);
    let target_height = target_height.max(1);
    let mut sample = 1;
    while width / (sample * 2) >= target_width && height / (sample * 2) >= target_height {
        sample *= 2;
    }
    sample
}

/// Decode fetched bytes and downsample them to the display target
pub fn resample(bytes: &[u8], target_width: u32, target_height: u32) -> Result<RgbaImage, LoadError> {
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = (decoded.width(), decoded.height());
    let sample = sample_factor(width, height, target_width, target_height);
    if sample == 1 {
        return Ok(decoded.into_rgba8());
    }
    debug!(
        "resample: {}x{} -> {}x{} (factor {})",
        width,
        height,
        width / sample,
        height / sample,
        sample
    );
    Ok(decoded
        .resize_exact(width / sample, height / sample, FilterType::Lanczos3)
        .into_rgba8())
}

/// Re-encode as JPEG, walking the quality down by fixed steps until the
/// output fits the size budget or the quality floor is reached.
pub fn quality_compress(image: &RgbaImage) -> Result<Vec<u8>, LoadError> {
    // JPEG carries no alpha channel
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut quality = INITIAL_QUALITY;
    let mut bytes = encode_jpeg(&rgb, quality)?;
    while bytes.len() > ENCODED_SIZE_BUDGET && quality > QUALITY_FLOOR {
        quality -= QUALITY_STEP;
        bytes = encode_jpeg(&rgb, quality)?;
    }
    debug!(
        "quality_compress: {} bytes at quality {}",
        bytes.len(),
        quality
    );
    Ok(bytes)
}

fn encode_jpeg(rgb: &image::RgbImage, quality: u8) -> Result<Vec<u8>, LoadError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::PngEncoder;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(w, h, |x, y| {
            image::Rgba([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8, 255])
        });
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgba8)
            .unwrap();
        bytes
    }

    #[test]
    fn sample_factor_stays_at_or_above_target() {
        assert_eq!(sample_factor(800, 600, 100, 75), 8);
        assert_eq!(sample_factor(800, 600, 101, 75), 4);
        assert_eq!(sample_factor(800, 600, 512, 512), 1);
        assert_eq!(sample_factor(100, 100, 400, 400), 1);
        // Degenerate zero target must not loop forever
        assert!(sample_factor(800, 600, 0, 0) >= 1);
    }

    #[test]
    fn resample_hits_the_target_dimensions() {
        let resampled = resample(&png_bytes(800, 600), 100, 75).unwrap();
        assert_eq!(resampled.dimensions(), (100, 75));
    }

    #[test]
    fn resample_never_scales_below_target() {
        let resampled = resample(&png_bytes(100, 80), 512, 512).unwrap();
        assert_eq!(resampled.dimensions(), (100, 80));
    }

    #[test]
    fn resample_rejects_garbage_bytes() {
        assert!(matches!(
            resample(b"garbage", 100, 100),
            Err(LoadError::Decode(_))
        ));
    }

    #[test]
    fn quality_loop_fits_budget_for_flat_images() {
        let flat = RgbaImage::from_pixel(400, 300, image::Rgba([128, 128, 128, 255]));
        let bytes = quality_compress(&flat).unwrap();
        assert!(bytes.len() <= ENCODED_SIZE_BUDGET);
        // The output is still a decodable JPEG
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    #[test]
    fn quality_loop_terminates_for_degenerate_input() {
        let tiny = RgbaImage::new(1, 1);
        let bytes = quality_compress(&tiny).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn quality_loop_terminates_for_incompressible_input() {
        // Pseudo-noise resists JPEG compression; the floor must stop the loop
        let noisy = RgbaImage::from_fn(1600, 1200, |x, y| {
            let v = (x.wrapping_mul(31).wrapping_add(y.wrapping_mul(17))) as u8;
            image::Rgba([v, v.wrapping_mul(7), v.wrapping_mul(13), 255])
        });
        let bytes = quality_compress(&noisy).unwrap();
        assert!(image::load_from_memory(&bytes).is_ok());
    }
}
