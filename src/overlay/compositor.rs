//! Clock/date bars drawn over the base frame every tick.

use std::fmt::Write as _;

use ab_glyph::FontArc;
use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use config_model::{BarLayout, BarPosition, OverlaysConfig};
use image::RgbImage;
use tracing::warn;

use crate::error::FormatError;
use crate::overlay::text::{Color, TextMetrics, draw_text, fill_rect, load_font, measure_text};

pub const DEFAULT_CLOCK_FORMAT: &str = "%H:%M";
pub const DEFAULT_DATE_FORMAT: &str = "%A, %B %d";

const BAR_PADDING: f32 = 8.0;
const EDGE_MARGIN: f32 = 20.0;
/// Text ascent line sits this far above the bar's top edge.
const TEXT_RAISE: f32 = 2.0;
const BAR_ALPHA: u8 = 120;
const TEXT_ALPHA: u8 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Clock,
    Date,
}

impl OverlayKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Clock => "clock",
            Self::Date => "date",
        }
    }

    fn default_format(self) -> &'static str {
        match self {
            Self::Clock => DEFAULT_CLOCK_FORMAT,
            Self::Date => DEFAULT_DATE_FORMAT,
        }
    }
}

/// Whether the clock separator is drawn during the given second.
pub fn colon_visible(second: u32) -> bool {
    second % 2 == 0
}

/// Check that `format` renders for a plain local timestamp.
pub fn validate_format(kind: OverlayKind, format: &str) -> Result<(), FormatError> {
    let invalid = || FormatError {
        overlay: kind.name(),
        format: format.to_string(),
    };
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(invalid());
    }
    let sample = NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(invalid)?;
    render_format(format, sample).map(|_| ()).ok_or_else(invalid)
}

fn render_format(format: &str, now: NaiveDateTime) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", now.format(format)).ok()?;
    Some(out)
}

#[derive(Debug, Clone, PartialEq)]
struct OverlaySpec {
    kind: OverlayKind,
    format: String,
    font_size: f32,
}

impl OverlaySpec {
    fn render(&self, now: NaiveDateTime) -> String {
        let text = render_format(&self.format, now)
            .or_else(|| render_format(self.kind.default_format(), now))
            .unwrap_or_default();
        if self.kind == OverlayKind::Clock && !colon_visible(now.second()) {
            text.replace(':', " ")
        } else {
            text
        }
    }
}

/// One overlay string ready for measuring and drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayText {
    pub kind: OverlayKind,
    pub text: String,
    pub font_size: f32,
}

/// Enabled overlays with validated formats. Rebuilt on every config load.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySet {
    clock: Option<OverlaySpec>,
    date: Option<OverlaySpec>,
    layout: BarLayout,
    position: BarPosition,
}

impl OverlaySet {
    pub fn from_config(cfg: &OverlaysConfig) -> Self {
        let spec = |kind: OverlayKind, overlay: &config_model::OverlayConfig| {
            if !overlay.enabled {
                return None;
            }
            let requested = overlay.format_or(kind.default_format());
            let format = match validate_format(kind, requested) {
                Ok(()) => requested.to_string(),
                Err(err) => {
                    warn!("{err}; using {:?}", kind.default_format());
                    kind.default_format().to_string()
                }
            };
            Some(OverlaySpec {
                kind,
                format,
                font_size: overlay.font_size,
            })
        };
        Self {
            clock: spec(OverlayKind::Clock, &cfg.clock),
            date: spec(OverlayKind::Date, &cfg.date),
            layout: cfg.layout,
            position: cfg.position,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clock.is_none() && self.date.is_none()
    }

    /// Text for every enabled overlay at `now`, clock first.
    pub fn texts(&self, now: NaiveDateTime) -> Vec<OverlayText> {
        [&self.clock, &self.date]
            .into_iter()
            .flatten()
            .map(|spec| OverlayText {
                kind: spec.kind,
                text: spec.render(now),
                font_size: spec.font_size,
            })
            .collect()
    }
}

/// A dark strip across the full frame width.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub top: f32,
    pub height: f32,
    pub texts: Vec<PlacedText>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedText {
    /// Index into the measured items.
    pub item: usize,
    pub left: f32,
    /// Y of the ascent line.
    pub top: f32,
}

/// Place measured overlays into bars. Pure geometry; `items` pairs each
/// overlay with its metrics in clock-then-date order.
pub fn layout_bars(
    frame_w: u32,
    frame_h: u32,
    items: &[(OverlayKind, TextMetrics)],
    layout: BarLayout,
    position: BarPosition,
) -> Vec<Bar> {
    if items.is_empty() {
        return Vec::new();
    }
    let frame_w = frame_w as f32;
    let frame_h = frame_h as f32;
    let bar_height = |ink: f32| ink.ceil() + BAR_PADDING * 2.0;

    let rows: Vec<(f32, Vec<PlacedText>)> = match layout {
        BarLayout::SideBySide => {
            let tallest = items
                .iter()
                .map(|(_, m)| m.ink_height())
                .fold(0.0f32, f32::max);
            let placed = items
                .iter()
                .enumerate()
                .map(|(item, (kind, metrics))| PlacedText {
                    item,
                    left: match kind {
                        OverlayKind::Date => EDGE_MARGIN,
                        OverlayKind::Clock => frame_w - metrics.width - EDGE_MARGIN,
                    },
                    top: 0.0,
                })
                .collect();
            vec![(bar_height(tallest), placed)]
        }
        BarLayout::Stacked => items
            .iter()
            .enumerate()
            .map(|(item, (_, metrics))| {
                (
                    bar_height(metrics.ink_height()),
                    vec![PlacedText {
                        item,
                        left: EDGE_MARGIN,
                        top: 0.0,
                    }],
                )
            })
            .collect(),
    };

    let total: f32 = rows.iter().map(|(height, _)| height).sum();
    let mut cursor = match position {
        BarPosition::Top => 0.0,
        BarPosition::Bottom => frame_h - total,
    };
    rows.into_iter()
        .map(|(height, texts)| {
            let top = cursor;
            cursor += height;
            Bar {
                top,
                height,
                texts: texts
                    .into_iter()
                    .map(|placed| PlacedText {
                        top: top - TEXT_RAISE,
                        ..placed
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Draws overlay bars onto copies of base frames.
pub struct OverlayCompositor {
    font: Option<FontArc>,
}

impl OverlayCompositor {
    /// Use the best matching system font; overlays are skipped when none loads.
    pub fn with_system_font(family: &str) -> Self {
        match load_font(family) {
            Ok(font) => Self::with_font(font),
            Err(err) => {
                warn!("{err:#}; clock and date overlays disabled");
                Self::without_font()
            }
        }
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    pub fn without_font() -> Self {
        Self { font: None }
    }

    /// New frame with the overlays for `now` drawn over `base`.
    pub fn compose(&self, base: &RgbImage, now: NaiveDateTime, overlays: &OverlaySet) -> RgbImage {
        let mut frame = base.clone();
        let Some(font) = self.font.as_ref() else {
            return frame;
        };
        if overlays.is_empty() {
            return frame;
        }

        let texts = overlays.texts(now);
        let items: Vec<(OverlayKind, TextMetrics)> = texts
            .iter()
            .map(|t| (t.kind, measure_text(&t.text, font, t.font_size)))
            .collect();
        let (width, height) = frame.dimensions();
        let bar_color = Color::from_rgba8(0, 0, 0, BAR_ALPHA);
        let text_color = Color::from_rgba8(255, 255, 255, TEXT_ALPHA);

        for bar in layout_bars(width, height, &items, overlays.layout, overlays.position) {
            fill_rect(
                &mut frame,
                0.0,
                bar.top,
                width as f32,
                bar.top + bar.height,
                bar_color,
            );
            for placed in &bar.texts {
                let text = &texts[placed.item];
                draw_text(
                    &mut frame,
                    font,
                    &text.text,
                    text.font_size,
                    placed.left,
                    placed.top,
                    text_color,
                );
            }
        }
        frame
    }
}
