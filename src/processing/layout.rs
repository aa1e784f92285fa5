/// Size that covers `target` while keeping the source aspect ratio.
///
/// Scales up as well as down; each side is rounded to the nearest pixel and
/// never falls short of the target.
pub fn resize_to_cover(target_w: u32, target_h: u32, src_w: u32, src_h: u32) -> (u32, u32) {
    let iw = src_w.max(1) as f64;
    let ih = src_h.max(1) as f64;
    let tw = target_w.max(1) as f64;
    let th = target_h.max(1) as f64;
    let scale = (tw / iw).max(th / ih);
    let w = (iw * scale).round().max(tw);
    let h = (ih * scale).round().max(th);
    (w as u32, h as u32)
}

/// Top-left corner of a centered `target` window inside `scaled`.
/// Odd leftovers are truncated.
pub fn crop_offset(scaled_w: u32, scaled_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    (
        scaled_w.saturating_sub(target_w) / 2,
        scaled_h.saturating_sub(target_h) / 2,
    )
}

/// Signed offset placing `inner` centered in `outer`; negative when `inner`
/// is larger and must be clipped.
pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (i64, i64) {
    let ox = (outer_w as i64 - inner_w as i64) / 2;
    let oy = (outer_h as i64 - inner_h as i64) / 2;
    (ox, oy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_fills_both_axes() {
        assert_eq!(resize_to_cover(1920, 1080, 4000, 3000), (1920, 1440));
        assert_eq!(resize_to_cover(1920, 1080, 3000, 4000), (1920, 2560));
        assert_eq!(resize_to_cover(1920, 1080, 1920, 1080), (1920, 1080));
    }

    #[test]
    fn cover_upscales_small_sources() {
        assert_eq!(resize_to_cover(40, 30, 10, 10), (40, 40));
        assert_eq!(resize_to_cover(64, 48, 2, 1), (96, 48));
    }

    #[test]
    fn crop_offset_truncates() {
        assert_eq!(crop_offset(1920, 1441, 1920, 1080), (0, 180));
        assert_eq!(crop_offset(101, 50, 100, 50), (0, 0));
        assert_eq!(crop_offset(50, 50, 100, 100), (0, 0));
    }

    #[test]
    fn center_offset_can_be_negative() {
        assert_eq!(center_offset(100, 50, 200, 100), (50, 25));
        assert_eq!(center_offset(200, 100, 100, 50), (-50, -25));
    }
}
