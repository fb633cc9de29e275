//! Compliance overlay rendering.
//!
//! Boxes and labels are drawn per category with a colour keyed by the
//! category's `detected` flag; a full-width banner at the top carries the
//! frame verdict. Text uses a scaled 5x7 bitmap font so no font files are
//! needed at runtime.

use image::{Rgb, RgbImage};

use crate::compliance::{ComplianceRecord, PpeCategory};

const DETECTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const NOT_DETECTED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const COMPLIANT_FILL: Rgb<u8> = Rgb([0, 170, 0]);
const NON_COMPLIANT_FILL: Rgb<u8> = Rgb([200, 0, 0]);
const BANNER_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
const GLYPH_ADVANCE: i64 = 6;

#[derive(Clone, Debug)]
pub struct Annotator {
    pub banner_height: u32,
    /// Pixel size of one glyph dot in the banner text.
    pub banner_scale: u32,
    pub label_scale: u32,
    pub box_thickness: u32,
    /// Gap between a box's top edge and its label.
    pub label_gap: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            banner_height: 60,
            banner_scale: 4,
            label_scale: 2,
            box_thickness: 2,
            label_gap: 4,
        }
    }
}

impl Annotator {
    /// Render the overlay onto a copy of `frame`.
    pub fn annotate(&self, frame: &RgbImage, record: &ComplianceRecord) -> RgbImage {
        let mut canvas = frame.clone();
        if canvas.width() == 0 || canvas.height() == 0 {
            return canvas;
        }

        for (category, state) in record.categories() {
            let color = if state.detected {
                DETECTED_COLOR
            } else {
                NOT_DETECTED_COLOR
            };
            for entry in &state.boxes {
                let bbox = entry.bbox;
                let (x1, y1) = (bbox.x1.round() as i64, bbox.y1.round() as i64);
                let (x2, y2) = (bbox.x2.round() as i64, bbox.y2.round() as i64);
                draw_rectangle(&mut canvas, x1, y1, x2, y2, self.box_thickness as i64, color);

                let label = label_text(category, entry.confidence);
                let scale = self.label_scale.max(1) as i64;
                let label_h = GLYPH_HEIGHT * scale;
                let label_w = text_width(&label, scale);
                let label_y = (y1 - self.label_gap as i64 - label_h).max(0);
                fill_rect(
                    &mut canvas,
                    x1 - 1,
                    label_y - 1,
                    x1 + label_w,
                    label_y + label_h,
                    LABEL_BACKGROUND,
                );
                draw_text(&mut canvas, x1, label_y, &label, scale, color);
            }
        }

        self.draw_banner(&mut canvas, record.compliant);
        canvas
    }

    fn draw_banner(&self, canvas: &mut RgbImage, compliant: bool) {
        let (fill, text) = if compliant {
            (COMPLIANT_FILL, "COMPLIANT")
        } else {
            (NON_COMPLIANT_FILL, "NON-COMPLIANT")
        };
        let height = self.banner_height as i64;
        if height == 0 {
            return;
        }
        fill_rect(canvas, 0, 0, canvas.width() as i64 - 1, height - 1, fill);

        let scale = self.banner_scale.max(1) as i64;
        let text_y = ((height - GLYPH_HEIGHT * scale) / 2).max(0);
        draw_text(canvas, 20, text_y, text, scale, BANNER_TEXT_COLOR);
    }
}

/// Box caption, e.g. `helmet: 0.87`. Rendered upper case by the bitmap font.
fn label_text(category: PpeCategory, confidence: f32) -> String {
    format!("{}: {:.2}", category, confidence)
}

fn text_width(text: &str, scale: i64) -> i64 {
    let chars = text.chars().count() as i64;
    if chars == 0 {
        0
    } else {
        (chars * GLYPH_ADVANCE - (GLYPH_ADVANCE - GLYPH_WIDTH)) * scale
    }
}

fn put_pixel(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < image.width() as i64 && y < image.height() as i64 {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Fill the inclusive rectangle, clipped to the image.
fn fill_rect(image: &mut RgbImage, left: i64, top: i64, right: i64, bottom: i64, color: Rgb<u8>) {
    let left = left.max(0);
    let top = top.max(0);
    let right = right.min(image.width() as i64 - 1);
    let bottom = bottom.min(image.height() as i64 - 1);
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Outline with the stroke growing inwards from the box edges. Only the part
/// of each edge inside the image is visited.
fn draw_rectangle(
    image: &mut RgbImage,
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
    thickness: i64,
    color: Rgb<u8>,
) {
    for t in 0..thickness.max(1) {
        let (l, r, tp, b) = (left + t, right - t, top + t, bottom - t);
        if l > r || tp > b {
            break;
        }
        let (x_from, x_to) = (l.max(0), r.min(image.width() as i64 - 1));
        let (y_from, y_to) = (tp.max(0), b.min(image.height() as i64 - 1));
        for x in x_from..=x_to {
            put_pixel(image, x, tp, color);
            put_pixel(image, x, b, color);
        }
        for y in y_from..=y_to {
            put_pixel(image, l, y, color);
            put_pixel(image, r, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, x: i64, y: i64, text: &str, scale: i64, color: Rgb<u8>) {
    let mut pen_x = x;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = pen_x + col * scale;
                        let py = y + row as i64 * scale;
                        fill_rect(image, px, py, px + scale - 1, py + scale - 1, color);
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ComplianceAggregator;
    use std::time::{Duration, Instant};
    use crate::detect::{BoundingBox, RawDetection};

    fn lookup(id: usize) -> Option<&'static str> {
        ["helmet", "safety glasses", "gloves"].get(id).copied()
    }

    fn record(detections: &[RawDetection]) -> ComplianceRecord {
        ComplianceAggregator::default().aggregate(detections, lookup)
    }

    fn det(class_id: usize, x1: f32, y1: f32, x2: f32, y2: f32) -> RawDetection {
        RawDetection::new(class_id, 0.87, BoundingBox::new(x1, y1, x2, y2).unwrap()).unwrap()
    }

    fn gray(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))
    }

    #[test]
    fn input_frame_is_not_mutated() {
        let frame = gray(320, 240);
        let before = frame.clone();
        let rec = record(&[det(0, 50.0, 100.0, 150.0, 200.0)]);
        let out = Annotator::default().annotate(&frame, &rec);
        assert_eq!(frame, before);
        assert_ne!(out, before);
    }

    #[test]
    fn empty_detections_draw_red_banner_only() {
        let frame = gray(200, 120);
        let out = Annotator::default().annotate(&frame, &record(&[]));
        assert_eq!(*out.get_pixel(2, 2), NON_COMPLIANT_FILL);
        assert_eq!(*out.get_pixel(199, 59), NON_COMPLIANT_FILL);
        // below the banner nothing changes
        for y in 60..120 {
            for x in 0..200 {
                assert_eq!(*out.get_pixel(x, y), Rgb([40, 40, 40]));
            }
        }
    }

    #[test]
    fn compliant_banner_is_green_with_white_text() {
        let frame = gray(400, 300);
        let rec = record(&[
            det(0, 10.0, 150.0, 60.0, 200.0),
            det(1, 100.0, 150.0, 160.0, 200.0),
            det(2, 200.0, 150.0, 260.0, 200.0),
        ]);
        assert!(rec.compliant);
        let out = Annotator::default().annotate(&frame, &rec);
        assert_eq!(*out.get_pixel(2, 2), COMPLIANT_FILL);
        let banner_has_text = (0..60)
            .flat_map(|y| (0..400).map(move |x| (x, y)))
            .any(|(x, y)| *out.get_pixel(x, y) == BANNER_TEXT_COLOR);
        assert!(banner_has_text);
    }

    #[test]
    fn detected_boxes_are_outlined_in_green() {
        let frame = gray(320, 240);
        let rec = record(&[det(2, 100.0, 120.0, 180.0, 220.0)]);
        let out = Annotator::default().annotate(&frame, &rec);
        assert_eq!(*out.get_pixel(100, 150), DETECTED_COLOR);
        assert_eq!(*out.get_pixel(179, 150), DETECTED_COLOR);
        assert_eq!(*out.get_pixel(140, 220), DETECTED_COLOR);
        assert_eq!(*out.get_pixel(140, 170), Rgb([40, 40, 40]));
    }

    #[test]
    fn label_near_top_edge_is_clamped() {
        let frame = gray(320, 240);
        let annotator = Annotator {
            banner_height: 0,
            ..Annotator::default()
        };
        let rec = record(&[det(0, 30.0, 2.0, 120.0, 80.0)]);
        let out = annotator.annotate(&frame, &rec);
        // label starts on the very first row instead of above the image
        assert_eq!(*out.get_pixel(29, 0), LABEL_BACKGROUND);
        assert_eq!(*out.get_pixel(30, 0), DETECTED_COLOR);
    }

    #[test]
    fn boxes_outside_frame_do_not_panic() {
        let frame = gray(64, 64);
        let rec = record(&[det(0, -20.0, -20.0, 500.0, 500.0)]);
        let out = Annotator::default().annotate(&frame, &rec);
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn far_reaching_boxes_are_clipped_not_walked() {
        let frame = gray(64, 128);
        let rec = record(&[
            det(0, 0.0, 80.0, 2e9, 100.0),
            det(1, -1e9, -1e9, 1e9, 1e9),
        ]);
        let started = Instant::now();
        let out = Annotator::default().annotate(&frame, &rec);
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
        // visible edges of the first box are drawn, the second lies fully outside
        assert_eq!(*out.get_pixel(0, 90), DETECTED_COLOR);
        assert_eq!(*out.get_pixel(63, 80), DETECTED_COLOR);
        assert_eq!(*out.get_pixel(30, 110), Rgb([40, 40, 40]));
    }

    #[test]
    fn labels_carry_category_and_two_decimal_confidence() {
        assert_eq!(label_text(PpeCategory::Helmet, 0.87), "helmet: 0.87");
        assert_eq!(label_text(PpeCategory::SafetyGlasses, 0.876), "safety_glasses: 0.88");
        assert_eq!(label_text(PpeCategory::Gloves, 1.0), "gloves: 1.00");
        for ch in label_text(PpeCategory::SafetyVest, 0.5)
            .chars()
            .flat_map(|c| c.to_uppercase())
        {
            assert!(glyph_bits(ch).is_some(), "missing glyph {ch}");
        }
    }

    #[test]
    fn every_category_name_renders() {
        for category in PpeCategory::ALL {
            for ch in category.as_str().chars().flat_map(|c| c.to_uppercase()) {
                assert!(glyph_bits(ch).is_some(), "missing glyph {ch}");
            }
        }
    }
}
