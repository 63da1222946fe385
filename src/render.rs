//! Annotated preview frames.
//!
//! Draws detection boxes, `"<name>: <score>%"` labels on a white background,
//! and an FPS counter onto a copy of the captured frame. Text uses a built-in
//! 5x7 bitmap font so rendering is deterministic and needs no font files.

use crate::detect::Detection;
use crate::frame::Frame;

const BOX_COLOR: [u8; 3] = [10, 255, 0];
const BOX_THICKNESS: i32 = 2;
const LABEL_BACKGROUND: [u8; 3] = [255, 255, 255];
const LABEL_COLOR: [u8; 3] = [0, 0, 0];
const LABEL_SCALE: i32 = 2;
const FPS_COLOR: [u8; 3] = [255, 255, 0];
const FPS_SCALE: i32 = 3;
const FPS_ORIGIN: (i32, i32) = (30, 50);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

/// Rendered text extent: width, height above the baseline, and descent below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextSize {
    pub width: i32,
    pub height: i32,
    pub baseline: i32,
}

pub fn text_size(text: &str, scale: i32) -> TextSize {
    let chars = text.chars().count() as i32;
    let width = if chars == 0 {
        0
    } else {
        (chars * GLYPH_ADVANCE - (GLYPH_ADVANCE - GLYPH_WIDTH)) * scale
    };
    TextSize {
        width,
        height: GLYPH_HEIGHT * scale,
        baseline: 2 * scale,
    }
}

/// Stateless renderer. Output depends only on its inputs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnnotationRenderer;

impl AnnotationRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Draw onto a fresh copy of `frame`; the input is left untouched.
    pub fn render(&self, frame: &Frame, detections: &[Detection], fps: f64) -> Frame {
        let mut canvas = frame.clone();

        for det in detections {
            let bbox = det.bounding_box;
            for inset in 0..BOX_THICKNESS {
                draw_rectangle(
                    &mut canvas,
                    bbox.x1 + inset,
                    bbox.y1 + inset,
                    bbox.x2 - inset,
                    bbox.y2 - inset,
                    BOX_COLOR,
                );
            }

            let label = format!("{}: {}%", det.label, det.score);
            let size = text_size(&label, LABEL_SCALE);
            // Keep the label inside the frame's top edge.
            let label_ymin = bbox.y1.max(size.height + 10);
            fill_rect(
                &mut canvas,
                bbox.x1,
                label_ymin - size.height - 10,
                bbox.x1 + size.width,
                label_ymin + size.baseline - 10,
                LABEL_BACKGROUND,
            );
            draw_text(
                &mut canvas,
                bbox.x1,
                label_ymin - 7,
                &label,
                LABEL_SCALE,
                LABEL_COLOR,
            );
        }

        let fps_text = format!("FPS: {:.2}", fps);
        draw_text(
            &mut canvas,
            FPS_ORIGIN.0,
            FPS_ORIGIN.1,
            &fps_text,
            FPS_SCALE,
            FPS_COLOR,
        );

        canvas
    }
}

fn draw_rectangle(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
    if left > right || top > bottom {
        return;
    }
    for x in left..=right {
        frame.put_pixel(x, top, color);
        frame.put_pixel(x, bottom, color);
    }
    for y in top..=bottom {
        frame.put_pixel(left, y, color);
        frame.put_pixel(right, y, color);
    }
}

fn fill_rect(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
    let left = left.max(0);
    let top = top.max(0);
    let right = right.min(frame.width as i32 - 1);
    let bottom = bottom.min(frame.height as i32 - 1);
    for y in top..=bottom {
        for x in left..=right {
            frame.put_pixel(x, y, color);
        }
    }
}

/// Draw `text` with its baseline at `baseline_y`.
fn draw_text(frame: &mut Frame, x: i32, baseline_y: i32, text: &str, scale: i32, color: [u8; 3]) {
    let top = baseline_y - GLYPH_HEIGHT * scale;
    let mut pen_x = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = pen_x + col * scale;
                    let py = top + row as i32 * scale;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            frame.put_pixel(px + dx, py + dy, color);
                        }
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let glyph = match ch {
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
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
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
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        _ => return None,
    };
    Some(glyph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn person(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            label: "person".to_string(),
            score: 91,
            bounding_box: BoundingBox { x1, y1, x2, y2 },
        }
    }

    fn count_color(frame: &Frame, color: [u8; 3]) -> usize {
        let mut n = 0;
        for y in 0..frame.height {
            for x in 0..frame.width {
                if frame.pixel(x, y) == Some(color) {
                    n += 1;
                }
            }
        }
        n
    }

    #[test]
    fn text_size_scales_with_length() {
        assert_eq!(
            text_size("AB", 1),
            TextSize {
                width: 11,
                height: 7,
                baseline: 2
            }
        );
        assert_eq!(text_size("AB", 2).width, 22);
        assert_eq!(text_size("", 2).width, 0);
    }

    #[test]
    fn render_leaves_input_untouched() {
        let frame = Frame::filled(640, 480, [40, 40, 40]);
        let out = AnnotationRenderer::new().render(&frame, &[person(96, 64, 288, 320)], 12.5);
        assert_eq!(frame, Frame::filled(640, 480, [40, 40, 40]));
        assert_ne!(out, frame);
    }

    #[test]
    fn render_is_deterministic() {
        let frame = Frame::filled(320, 240, [0, 0, 0]);
        let detections = [person(20, 30, 120, 200), person(150, 5, 300, 230)];
        let renderer = AnnotationRenderer::new();
        let a = renderer.render(&frame, &detections, 7.0);
        let b = renderer.render(&frame, &detections, 7.0);
        assert_eq!(a, b);
    }

    #[test]
    fn draws_box_edges() {
        let frame = Frame::filled(640, 480, [0, 0, 0]);
        let out = AnnotationRenderer::new().render(&frame, &[person(96, 200, 288, 320)], 1.0);
        assert_eq!(out.pixel(96, 260), Some(BOX_COLOR));
        assert_eq!(out.pixel(97, 260), Some(BOX_COLOR));
        assert_eq!(out.pixel(288, 260), Some(BOX_COLOR));
        assert_eq!(out.pixel(200, 320), Some(BOX_COLOR));
        // Interior stays untouched.
        assert_eq!(out.pixel(200, 260), Some([0, 0, 0]));
    }

    #[test]
    fn label_is_kept_below_top_edge() {
        let frame = Frame::filled(640, 480, [0, 0, 0]);
        let out = AnnotationRenderer::new().render(&frame, &[person(300, 1, 400, 100)], 1.0);
        // Background box starts at row 0 rather than being cut off above the frame.
        assert_eq!(out.pixel(300, 0), Some(LABEL_BACKGROUND));
        let size = text_size("person: 91%", LABEL_SCALE);
        assert_eq!(out.pixel((300 + size.width) as u32, 0), Some(LABEL_BACKGROUND));
    }

    #[test]
    fn no_detections_draws_only_fps() {
        let frame = Frame::filled(640, 480, [0, 0, 0]);
        let out = AnnotationRenderer::new().render(&frame, &[], 30.0);
        assert_eq!(count_color(&out, BOX_COLOR), 0);
        assert_eq!(count_color(&out, LABEL_BACKGROUND), 0);
        assert!(count_color(&out, FPS_COLOR) > 0);
        // All FPS pixels sit in the overlay band above its baseline.
        for y in FPS_ORIGIN.1 as u32..480 {
            for x in 0..640 {
                assert_eq!(out.pixel(x, y), Some([0, 0, 0]));
            }
        }
    }
}
