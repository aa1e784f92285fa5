//! Turns an image file into a display-ready frame: decode, orient, cover,
//! crop, dim.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use config_model::Resolution;
use fast_image_resize as fir;
use image::{DynamicImage, ImageFormat, RgbImage, imageops};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::meta::{exif_orientation_label, read_exif_orientation};
use crate::processing::color::{BRIGHTNESS_FACTOR, scale_brightness};
use crate::processing::layout::{crop_offset, resize_to_cover};
use crate::processing::orientation::{apply_orientation, swaps_dimensions};

/// Produce the base frame for `path` at exactly `target`.
pub fn process(path: &Path, target: Resolution) -> Result<RgbImage, DecodeError> {
    let bytes = fs::read(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    process_bytes(path, &bytes, target)
}

/// Same as [`process`] for bytes already in memory; `path` is only used for
/// diagnostics.
pub fn process_bytes(path: &Path, bytes: &[u8], target: Resolution) -> Result<RgbImage, DecodeError> {
    let orientation = read_exif_orientation(bytes).unwrap_or(1);
    if orientation != 1 {
        debug!(
            path = %path.display(),
            orientation = exif_orientation_label(orientation),
            "applying exif orientation"
        );
    }
    let decoded = decode(path, bytes, target, orientation)?;
    let upright = apply_orientation(decoded, orientation).to_rgb8();
    let mut frame = cover_and_crop(&upright, target).map_err(|err| DecodeError::Resize {
        path: path.to_path_buf(),
        reason: format!("{err:#}"),
    })?;
    scale_brightness(&mut frame, BRIGHTNESS_FACTOR);
    Ok(frame)
}

/// Run [`process`], substituting a black frame when the image is unusable.
pub fn process_or_fallback(path: &Path, target: Resolution) -> RgbImage {
    match process(path, target) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("{err}; showing fallback frame");
            fallback_frame(target)
        }
    }
}

/// Black frame shown for undecodable images and empty catalogs.
pub fn fallback_frame(target: Resolution) -> RgbImage {
    RgbImage::new(target.width.max(1), target.height.max(1))
}

/// Scale `src` to cover `target`, then center-crop to it.
pub fn cover_and_crop(src: &RgbImage, target: Resolution) -> Result<RgbImage> {
    let (tw, th) = (target.width.max(1), target.height.max(1));
    let (sw, sh) = resize_to_cover(tw, th, src.width(), src.height());
    let scaled = resize_rgb(src, sw, sh)?;
    if (sw, sh) == (tw, th) {
        return Ok(scaled);
    }
    let (x, y) = crop_offset(sw, sh, tw, th);
    Ok(imageops::crop_imm(&scaled, x, y, tw, th).to_image())
}

fn decode(
    path: &Path,
    bytes: &[u8],
    target: Resolution,
    orientation: u16,
) -> Result<DynamicImage, DecodeError> {
    if matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg)) {
        match decode_jpeg_scaled(bytes, target, orientation) {
            Ok(img) => return Ok(DynamicImage::ImageRgb8(img)),
            Err(err) => {
                debug!(
                    path = %path.display(),
                    "scaled JPEG decode failed: {err:#}; falling back"
                );
            }
        }
    }

    image::load_from_memory(bytes).map_err(|source| DecodeError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode a JPEG at the smallest DCT scale that still covers the target.
/// The returned image is in stored (pre-orientation) layout.
fn decode_jpeg_scaled(bytes: &[u8], target: Resolution, orientation: u16) -> Result<RgbImage> {
    use jpeg_decoder::Error as JpegError;

    fn jpeg_err(err: JpegError) -> anyhow::Error {
        match err {
            JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
            other => anyhow!(other),
        }
    }

    let mut decoder = JpegDecoder::new(Cursor::new(bytes));
    decoder.read_info().map_err(jpeg_err)?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("missing image info after reading JPEG header"))?;
    let (raw_w, raw_h) = (info.width as u32, info.height as u32);

    // Cover size is computed upright, then mapped back to stored layout.
    let swap = swaps_dimensions(orientation);
    let (upright_w, upright_h) = if swap { (raw_h, raw_w) } else { (raw_w, raw_h) };
    let (cover_w, cover_h) =
        resize_to_cover(target.width, target.height, upright_w, upright_h);
    let (request_w, request_h) = if swap { (cover_h, cover_w) } else { (cover_w, cover_h) };
    decoder
        .scale(
            request_w.clamp(1, u16::MAX as u32) as u16,
            request_h.clamp(1, u16::MAX as u32) as u16,
        )
        .map_err(jpeg_err)?;

    let pixels = decoder.decode().map_err(jpeg_err)?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("missing image info after decoding JPEG"))?;
    let width = info.width as u32;
    let height = info.height as u32;

    let rgb = match info.pixel_format {
        PixelFormat::RGB24 => pixels,
        PixelFormat::L8 => pixels.iter().flat_map(|&v| [v, v, v]).collect(),
        PixelFormat::CMYK32 => {
            let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
            for chunk in pixels.chunks_exact(4) {
                let c = chunk[0] as f32 / 255.0;
                let m = chunk[1] as f32 / 255.0;
                let y = chunk[2] as f32 / 255.0;
                let k = chunk[3] as f32 / 255.0;
                let c = c * (1.0 - k) + k;
                let m = m * (1.0 - k) + k;
                let y = y * (1.0 - k) + k;
                rgb.push(((1.0 - c) * 255.0).round().clamp(0.0, 255.0) as u8);
                rgb.push(((1.0 - m) * 255.0).round().clamp(0.0, 255.0) as u8);
                rgb.push(((1.0 - y) * 255.0).round().clamp(0.0, 255.0) as u8);
            }
            rgb
        }
        PixelFormat::L16 => {
            anyhow::bail!("16-bit grayscale JPEGs are not supported by the scaled decoder");
        }
    };

    debug!(raw_w, raw_h, width, height, "decoded JPEG at reduced scale");
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| anyhow!("decoded JPEG buffer does not match {width}x{height}"))
}

fn resize_rgb(source: &RgbImage, target_w: u32, target_h: u32) -> Result<RgbImage> {
    if target_w == 0 || target_h == 0 {
        anyhow::bail!("resize dimensions must be positive");
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x3,
    )
    .map_err(|err| anyhow!("invalid source buffer: {err}"))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x3);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| anyhow!("resize failed: {err}"))?;
    RgbImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| anyhow!("failed to construct resized RGB image"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameKey {
    Image(PathBuf),
    Placeholder,
}

#[derive(Debug)]
struct CachedFrame {
    key: FrameKey,
    resolution: Resolution,
    frame: Arc<RgbImage>,
}

/// Holds the base frame of the image currently on screen. Asking for any
/// other image or resolution evicts it.
#[derive(Debug, Default)]
pub struct FrameCache {
    entry: Option<CachedFrame>,
    decodes: u64,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base frame for `path`, decoding on a miss. Fallback frames are cached
    /// like real ones so a broken file is decoded once per visit.
    pub fn frame_for(&mut self, path: &Path, resolution: Resolution) -> Arc<RgbImage> {
        let key = FrameKey::Image(path.to_path_buf());
        self.get_or_insert(key, resolution, || process_or_fallback(path, resolution))
    }

    /// Frame shown while the catalog is empty.
    pub fn placeholder(&mut self, resolution: Resolution) -> Arc<RgbImage> {
        self.get_or_insert(FrameKey::Placeholder, resolution, || {
            fallback_frame(resolution)
        })
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    /// Number of decodes performed so far.
    pub fn decodes(&self) -> u64 {
        self.decodes
    }

    fn get_or_insert(
        &mut self,
        key: FrameKey,
        resolution: Resolution,
        build: impl FnOnce() -> RgbImage,
    ) -> Arc<RgbImage> {
        if let Some(hit) = self
            .entry
            .as_ref()
            .filter(|cached| cached.key == key && cached.resolution == resolution)
        {
            return Arc::clone(&hit.frame);
        }

        if matches!(key, FrameKey::Image(_)) {
            self.decodes += 1;
        }
        let frame = Arc::new(build());
        self.entry = Some(CachedFrame {
            key,
            resolution,
            frame: Arc::clone(&frame),
        });
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use image::Rgb;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    #[test]
    fn output_matches_target_for_any_aspect() {
        let target = Resolution::new(64, 48);
        for (w, h) in [(100, 50), (50, 100), (33, 77), (64, 48), (10, 10), (640, 480), (1, 300)] {
            let src = RgbImage::from_pixel(w, h, Rgb([120, 60, 30]));
            let bytes = encode(&src, ImageFormat::Png);
            let frame = process_bytes(Path::new("mem.png"), &bytes, target).unwrap();
            assert_eq!(frame.dimensions(), (64, 48), "source {w}x{h}");
        }
    }

    #[test]
    fn target_sized_input_is_only_dimmed() {
        let src = RgbImage::from_fn(8, 6, |x, y| Rgb([x as u8 * 30, y as u8 * 40, 255]));
        let bytes = encode(&src, ImageFormat::Png);
        let frame = process_bytes(Path::new("mem.png"), &bytes, Resolution::new(8, 6)).unwrap();
        let mut expected = src.clone();
        scale_brightness(&mut expected, BRIGHTNESS_FACTOR);
        assert_eq!(frame, expected);
    }

    #[test]
    fn crops_the_center() {
        // Left third red, middle green, right third blue; the crop keeps green.
        let src = RgbImage::from_fn(30, 10, |x, _| match x {
            0..10 => Rgb([255, 0, 0]),
            10..20 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        });
        let framed = cover_and_crop(&src, Resolution::new(10, 10)).unwrap();
        assert_eq!(framed.dimensions(), (10, 10));
        let px = framed.get_pixel(5, 5);
        assert!(px[1] > 200 && px[0] < 40 && px[2] < 40, "center pixel {px:?}");
    }

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        assert_eq!(read_exif_orientation(&bytes), Some(6));
        // Stored 2x1, upright 1x2: a 1x2 target needs no scaling at all.
        let frame = process_bytes(Path::new("orient6.jpg"), &bytes, Resolution::new(1, 2)).unwrap();
        assert_eq!(frame.dimensions(), (1, 2));
    }

    /// Splice a big-endian EXIF block carrying only an orientation tag in
    /// right after the JPEG SOI marker.
    fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        let mut tiff = b"MM\0\x2a\0\0\0\x08".to_vec();
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&tiff);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn orientation_six_turns_left_edge_to_top() {
        // Stored 32x16: left half red, right half blue.
        let stored = RgbImage::from_fn(32, 16, |x, _| {
            if x < 16 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        });
        let bytes = with_exif_orientation(&encode(&stored, ImageFormat::Jpeg), 6);
        assert_eq!(read_exif_orientation(&bytes), Some(6));

        let frame = process_bytes(Path::new("turned.jpg"), &bytes, Resolution::new(16, 32)).unwrap();
        assert_eq!(frame.dimensions(), (16, 32));
        let top = frame.get_pixel(8, 4);
        let bottom = frame.get_pixel(8, 27);
        assert!(top[0] > 100 && top[2] < 40, "top {top:?}");
        assert!(bottom[2] > 100 && bottom[0] < 40, "bottom {bottom:?}");
    }

    #[test]
    fn large_jpeg_uses_scaled_decode() {
        let src = RgbImage::from_pixel(640, 480, Rgb([200, 100, 50]));
        let bytes = encode(&src, ImageFormat::Jpeg);
        let scaled = decode_jpeg_scaled(&bytes, Resolution::new(80, 60), 1).unwrap();
        assert_eq!(scaled.dimensions(), (80, 60));

        let frame = process_bytes(Path::new("big.jpg"), &bytes, Resolution::new(80, 60)).unwrap();
        assert_eq!(frame.dimensions(), (80, 60));
        let px = frame.get_pixel(40, 30);
        assert!((px[0] as i32 - 100).abs() <= 4, "dimmed red {px:?}");
    }

    #[test]
    fn corrupt_file_yields_decode_error_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"\xFF\xD8\xFFnot really a jpeg").unwrap();
        let target = Resolution::new(16, 9);
        assert!(matches!(process(&path, target), Err(DecodeError::Image { .. })));

        let frame = process_or_fallback(&path, target);
        assert_eq!(frame.dimensions(), (16, 9));
        assert!(frame.pixels().all(|px| px.0 == [0, 0, 0]));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = process(Path::new("/definitely/not/here.png"), Resolution::new(4, 4)).unwrap_err();
        assert!(matches!(err, DecodeError::Io { .. }));
    }

    #[test]
    fn cache_holds_a_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        RgbImage::from_pixel(4, 4, Rgb([255, 0, 0])).save(&a).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 255])).save(&b).unwrap();
        let res = Resolution::new(4, 4);

        let mut cache = FrameCache::new();
        let first = cache.frame_for(&a, res);
        let again = cache.frame_for(&a, res);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.decodes(), 1);

        cache.frame_for(&b, res);
        cache.frame_for(&a, res);
        assert_eq!(cache.decodes(), 3);

        cache.frame_for(&a, Resolution::new(2, 2));
        assert_eq!(cache.decodes(), 4);

        cache.clear();
        cache.frame_for(&a, Resolution::new(2, 2));
        assert_eq!(cache.decodes(), 5);
    }
}
