//! Drawing of perception results onto the annotated frame.

use ab_glyph::{FontVec, PxScale};
use image::Rgb;
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::detection::domain::marker_detector::DetectedMarker;
use crate::shared::frame::Frame;
use crate::shared::region::Region;

const FACE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MARKER_OUTLINE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MARKER_ID_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const AXIS_COLORS: [Rgb<u8>; 3] = [Rgb([255, 0, 0]), Rgb([0, 255, 0]), Rgb([0, 0, 255])];

/// Height of the filled name strip under a face box.
pub const LABEL_STRIP_HEIGHT: i32 = 20;
const LABEL_SCALE: f32 = 14.0;
const LABEL_INSET: i32 = 2;

/// Draws face boxes, name strips, marker outlines, pose axes and ids.
///
/// Text needs a font; without one only the shapes are drawn.
pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// A 1 px box around the face and a filled strip below it holding
    /// the name.
    pub fn draw_face(&self, frame: &mut Frame, region: &Region, name: &str) {
        let Some(mut canvas) = frame.as_rgb_canvas() else {
            return;
        };
        if region.width <= 0 || region.height <= 0 {
            return;
        }
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(region.x, region.y).of_size(region.width as u32, region.height as u32),
            FACE_COLOR,
        );
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(region.x, region.bottom())
                .of_size(region.width as u32, LABEL_STRIP_HEIGHT as u32),
            FACE_COLOR,
        );
        if let Some(font) = &self.font {
            draw_text_mut(
                &mut canvas,
                LABEL_TEXT_COLOR,
                region.x + LABEL_INSET,
                region.bottom() + LABEL_INSET,
                PxScale::from(LABEL_SCALE),
                font,
                name,
            );
        }
    }

    /// Marker outline, pose axes (origin, x, y, z tips in pixels) when
    /// known, and the id at the marker's top-left corner.
    pub fn draw_marker(&self, frame: &mut Frame, marker: &DetectedMarker, axes: Option<&[[f64; 2]; 4]>) {
        let Some(mut canvas) = frame.as_rgb_canvas() else {
            return;
        };
        let pt = |p: [f64; 2]| (p[0] as f32, p[1] as f32);

        for i in 0..4 {
            draw_line_segment_mut(
                &mut canvas,
                pt(marker.corners[i]),
                pt(marker.corners[(i + 1) % 4]),
                MARKER_OUTLINE_COLOR,
            );
        }

        if let Some(axes) = axes {
            let origin = pt(axes[0]);
            for (tip, color) in axes[1..].iter().zip(AXIS_COLORS) {
                let tip = pt(*tip);
                // 3 px wide
                for d in [-1.0f32, 0.0, 1.0] {
                    draw_line_segment_mut(
                        &mut canvas,
                        (origin.0 + d, origin.1),
                        (tip.0 + d, tip.1),
                        color,
                    );
                    draw_line_segment_mut(
                        &mut canvas,
                        (origin.0, origin.1 + d),
                        (tip.0, tip.1 + d),
                        color,
                    );
                }
            }
        }

        if let Some(font) = &self.font {
            let [x, y] = marker.top_left();
            draw_text_mut(
                &mut canvas,
                MARKER_ID_COLOR,
                x as i32,
                y as i32 - LABEL_SCALE as i32 - LABEL_INSET,
                PxScale::from(LABEL_SCALE),
                font,
                &marker.id.to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(w: u32, h: u32) -> Frame {
        Frame::new(vec![0; (w * h * 3) as usize], w, h, 3, 0)
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * frame.width() + x) * 3) as usize;
        [frame.data()[i], frame.data()[i + 1], frame.data()[i + 2]]
    }

    #[test]
    fn test_face_box_and_strip_are_drawn() {
        let mut frame = black(100, 100);
        Overlay::new(None).draw_face(&mut frame, &Region::new(10, 10, 40, 30), "alice");

        assert_eq!(pixel(&frame, 10, 25), [255, 0, 0], "left edge");
        assert_eq!(pixel(&frame, 30, 25), [0, 0, 0], "inside stays clear");
        assert_eq!(pixel(&frame, 30, 50), [255, 0, 0], "label strip");
        assert_eq!(pixel(&frame, 30, 61), [0, 0, 0], "below strip");
    }

    #[test]
    fn test_face_strip_clipped_at_frame_edge() {
        let mut frame = black(50, 50);
        Overlay::new(None).draw_face(&mut frame, &Region::new(5, 20, 20, 25), "bob");
        assert_eq!(pixel(&frame, 10, 49), [255, 0, 0]);
    }

    #[test]
    fn test_grayscale_frame_is_left_untouched() {
        let mut frame = Frame::new(vec![0; 100], 10, 10, 1, 0);
        Overlay::new(None).draw_face(&mut frame, &Region::new(1, 1, 5, 5), "x");
        assert!(frame.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_marker_outline_and_axes_are_drawn() {
        let mut frame = black(100, 100);
        let marker = DetectedMarker {
            id: 3,
            corners: [[20.0, 20.0], [80.0, 20.0], [80.0, 80.0], [20.0, 80.0]],
        };
        let axes = [[50.0, 50.0], [70.0, 50.0], [50.0, 30.0], [50.0, 50.0]];
        Overlay::new(None).draw_marker(&mut frame, &marker, Some(&axes));

        assert_eq!(pixel(&frame, 50, 20), [0, 255, 0], "outline");
        assert_eq!(pixel(&frame, 60, 50), [255, 0, 0], "x axis");
        assert_eq!(pixel(&frame, 50, 40), [0, 255, 0], "y axis");
    }
}
