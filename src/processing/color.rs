use image::RgbImage;

/// Fixed dimming applied to every display frame.
pub const BRIGHTNESS_FACTOR: f32 = 0.5;

/// Multiply every channel by `factor`, rounding to nearest and clamping.
pub fn scale_brightness(img: &mut RgbImage, factor: f32) {
    for channel in img.iter_mut() {
        *channel = scale_channel(*channel, factor);
    }
}

#[inline]
fn scale_channel(value: u8, factor: f32) -> u8 {
    (value as f32 * factor).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn halves_every_channel_within_rounding() {
        for v in 0..=255u8 {
            let out = scale_channel(v, BRIGHTNESS_FACTOR) as f32;
            assert!((out - v as f32 * 0.5).abs() <= 0.5, "value {v} -> {out}");
        }
    }

    #[test]
    fn clamps_when_brightening() {
        let mut img = RgbImage::from_pixel(1, 1, Rgb([200, 10, 0]));
        scale_brightness(&mut img, 2.0);
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 20, 0]));
    }
}
