use image::DynamicImage;

/// Rotate/flip `img` upright for an EXIF orientation value. Values outside
/// 1..=8 are treated as 1.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        // transpose
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        // transverse
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Whether the orientation swaps width and height.
pub fn swaps_dimensions(orientation: u16) -> bool {
    matches!(orientation, 5..=8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    const W: u32 = 3;
    const H: u32 = 2;

    fn reference() -> RgbImage {
        RgbImage::from_fn(W, H, |x, y| Rgb([x as u8 * 40, y as u8 * 90, 7]))
    }

    /// Source coordinate shown at output pixel (x, y) for each orientation.
    fn expected_source(orientation: u16, x: u32, y: u32) -> (u32, u32) {
        match orientation {
            1 => (x, y),
            2 => (W - 1 - x, y),
            3 => (W - 1 - x, H - 1 - y),
            4 => (x, H - 1 - y),
            5 => (y, x),
            6 => (y, H - 1 - x),
            7 => (W - 1 - y, H - 1 - x),
            8 => (W - 1 - y, x),
            _ => unreachable!(),
        }
    }

    #[test]
    fn matches_reference_for_every_orientation() {
        let src = reference();
        for orientation in 1..=8u16 {
            let out = apply_orientation(DynamicImage::ImageRgb8(src.clone()), orientation);
            let expected_dims = if swaps_dimensions(orientation) { (H, W) } else { (W, H) };
            assert_eq!(out.dimensions(), expected_dims, "orientation {orientation}");
            let out = out.to_rgb8();
            for (x, y, px) in out.enumerate_pixels() {
                let (sx, sy) = expected_source(orientation, x, y);
                assert_eq!(px, src.get_pixel(sx, sy), "orientation {orientation} at ({x},{y})");
            }
        }
    }

    #[test]
    fn unknown_values_are_identity() {
        let src = reference();
        let out = apply_orientation(DynamicImage::ImageRgb8(src.clone()), 0).to_rgb8();
        assert_eq!(out, src);
        let out = apply_orientation(DynamicImage::ImageRgb8(src.clone()), 9).to_rgb8();
        assert_eq!(out, src);
    }
}
