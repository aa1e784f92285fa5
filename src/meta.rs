use std::io::Cursor;

use exif::{In, Tag};

/// EXIF orientation of an encoded image, `None` when the tag is absent or
/// the container carries no EXIF block.
pub fn read_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
    field
        .value
        .get_uint(0)
        .and_then(|value| u16::try_from(value).ok())
}

#[inline]
pub fn exif_orientation_label(v: u16) -> &'static str {
    match v {
        1 => "Normal (1)",
        2 => "Mirrored horizontal (2)",
        3 => "Rotated 180° (3)",
        4 => "Mirrored vertical (4)",
        5 => "Mirrored horizontal + Rotated 270° (5)",
        6 => "Rotated 90° CW (6)",
        7 => "Mirrored horizontal + Rotated 90° (7)",
        8 => "Rotated 270° CW (8)",
        _ => "Unknown",
    }
}
