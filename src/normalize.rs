//! Download a chosen image and make it safe to commit: opaque, at most
//! [`MAX_IMAGE_WIDTH`] wide, re-encoded as JPEG or PNG.

use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgba, RgbaImage};

use crate::error::ImageProcessingError;
use crate::extract::USER_AGENT;

pub const MAX_IMAGE_WIDTH: u32 = 1200;
pub const JPEG_QUALITY: u8 = 85;
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn for_filename(filename: &str) -> Self {
        if filename.to_lowercase().ends_with(".png") {
            OutputFormat::Png
        } else {
            OutputFormat::Jpeg
        }
    }
}

/// Download `source_url` and normalize it for `target_filename`.
pub async fn normalize_image(
    source_url: &str,
    target_filename: &str,
) -> Result<Vec<u8>, ImageProcessingError> {
    let bytes = download(source_url, Duration::from_secs(DOWNLOAD_TIMEOUT_SECS)).await?;
    let encoded = normalize_bytes(&bytes, target_filename)?;
    tracing::info!(
        url = source_url,
        target = target_filename,
        downloaded = bytes.len(),
        encoded = encoded.len(),
        "normalized image"
    );
    Ok(encoded)
}

async fn download(source_url: &str, timeout: Duration) -> Result<Vec<u8>, ImageProcessingError> {
    let client = reqwest::ClientBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ImageProcessingError::Request(e.to_string()))?;

    let response = client
        .get(source_url)
        .send()
        .await
        .map_err(|e| ImageProcessingError::from_reqwest(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ImageProcessingError::Status(status.as_u16()));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ImageProcessingError::from_reqwest(e, timeout))?;
    Ok(bytes.to_vec())
}

/// Decode, flatten, resize and re-encode an in-memory image.
pub fn normalize_bytes(
    bytes: &[u8],
    target_filename: &str,
) -> Result<Vec<u8>, ImageProcessingError> {
    let img = image::load_from_memory(bytes).map_err(ImageProcessingError::Decode)?;
    let img = flatten_alpha(img);
    let img = limit_width(img, MAX_IMAGE_WIDTH);
    encode(&img, OutputFormat::for_filename(target_filename))
}

/// Composite any alpha channel onto white. The result is always RGB8.
fn flatten_alpha(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }
    let top = img.to_rgba8();
    let mut canvas = RgbaImage::from_pixel(top.width(), top.height(), Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, &top, 0, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

fn limit_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width <= max_width {
        return img;
    }
    let new_height = scaled_height(width, height, max_width);
    img.resize_exact(max_width, new_height, FilterType::Lanczos3)
}

/// `round(height * max_width / width)`, never zero.
pub fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
    scaled.max(1)
}

fn encode(img: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, ImageProcessingError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    match format {
        OutputFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Best,
                PngFilter::Adaptive,
            );
            encoder
                .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
                .map_err(ImageProcessingError::Encode)?;
        }
        OutputFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
            encoder
                .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
                .map_err(ImageProcessingError::Encode)?;
        }
    }
    Ok(buf)
}
