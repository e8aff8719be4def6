//! Detector for square binary fiducials: a black border one cell wide
//! around a 4x4 grid of data cells (white = 1).
//!
//! A marker's id is the smallest 16-bit code among the four rotations of
//! its grid, read row-major with the first cell as the most significant
//! bit. The rotation that yields that code defines the marker's upright
//! orientation and so its corner order. Rotationally symmetric grids have
//! no defined orientation and are rejected.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;

use crate::detection::domain::marker_detector::{DetectedMarker, MarkerDetector};
use crate::detection::domain::marker_pose::{apply_homography, homography_dlt};
use crate::shared::frame::Frame;

const DATA_CELLS: usize = 4;
const GRID_CELLS: usize = DATA_CELLS + 2;

/// Sample offsets inside a cell, as fractions of the cell size.
const CELL_SAMPLES: [f64; 3] = [0.3, 0.5, 0.7];

pub const DEFAULT_MIN_PERIMETER_PX: f64 = 48.0;

/// Polygon simplification tolerance relative to the contour length.
const APPROX_EPSILON_RATIO: f64 = 0.04;

type Grid = [[bool; DATA_CELLS]; DATA_CELLS];

pub struct SquareMarkerDetector {
    min_perimeter_px: f64,
}

impl SquareMarkerDetector {
    pub fn new(min_perimeter_px: f64) -> Self {
        Self { min_perimeter_px }
    }

    fn candidate_quads(&self, binary: &GrayImage) -> Vec<[[f64; 2]; 4]> {
        let mut quads = Vec::new();
        for contour in find_contours::<i32>(binary) {
            if contour.border_type != BorderType::Outer {
                continue;
            }
            let perimeter = arc_length(&contour.points, true);
            if perimeter < self.min_perimeter_px {
                continue;
            }
            let epsilon = perimeter * APPROX_EPSILON_RATIO;
            let poly = approximate_polygon_dp(&contour.points, epsilon, true);
            if let Some(quad) = as_convex_quad(&poly, epsilon) {
                quads.push(quad);
            }
        }
        quads
    }
}

impl Default for SquareMarkerDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PERIMETER_PX)
    }
}

impl MarkerDetector for SquareMarkerDetector {
    fn detect(&mut self, gray: &Frame) -> Result<Vec<DetectedMarker>, Box<dyn std::error::Error>> {
        let image = gray
            .to_gray_image()
            .ok_or("Failed to create grayscale image from frame")?;
        if image.width() < GRID_CELLS as u32 || image.height() < GRID_CELLS as u32 {
            return Ok(Vec::new());
        }

        let level = imageproc::contrast::otsu_level(&image);
        // Dark pixels are foreground for contour tracing.
        let binary = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            if image.get_pixel(x, y)[0] <= level {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        });

        let mut markers: Vec<DetectedMarker> = Vec::new();
        for quad in self.candidate_quads(&binary) {
            let Some(grid) = read_grid(&image, &quad, level) else {
                continue;
            };
            let Some((id, turns)) = canonical_code(&grid) else {
                continue;
            };
            let mut corners = quad;
            corners.rotate_left(turns);
            // Nested contours of the same marker report once.
            if markers.iter().any(|m| m.id == id && same_place(&m.corners, &corners)) {
                continue;
            }
            markers.push(DetectedMarker { id, corners });
        }
        Ok(markers)
    }
}

/// Reduces a closed polygon to a convex quad ordered clockwise on
/// screen, each vertex pushed half a pixel outward so the quad covers
/// whole border pixels.
///
/// Vertices closer than `epsilon` to the line through their neighbours
/// (including a repeated closing point) are dropped first.
fn as_convex_quad(poly: &[Point<i32>], epsilon: f64) -> Option<[[f64; 2]; 4]> {
    let mut pts: Vec<[f64; 2]> = poly.iter().map(|p| [p.x as f64, p.y as f64]).collect();
    if pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }
    while pts.len() > 4 {
        let n = pts.len();
        let (i, dist) = (0..n)
            .map(|i| (i, line_distance(pts[(i + n - 1) % n], pts[(i + 1) % n], pts[i])))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        if dist >= epsilon {
            return None;
        }
        pts.remove(i);
    }
    if pts.len() != 4 {
        return None;
    }
    let mut quad = [pts[0], pts[1], pts[2], pts[3]];

    let cross = |i: usize| {
        let [a, b, c] = [quad[i], quad[(i + 1) % 4], quad[(i + 2) % 4]];
        (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0])
    };
    let turns: Vec<f64> = (0..4).map(cross).collect();
    let convex = turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0);
    if !convex {
        return None;
    }
    if turns[0] < 0.0 {
        quad.reverse();
    }

    let cx = quad.iter().map(|p| p[0]).sum::<f64>() / 4.0;
    let cy = quad.iter().map(|p| p[1]).sum::<f64>() / 4.0;
    for p in &mut quad {
        p[0] += 0.5 * (p[0] - cx).signum();
        p[1] += 0.5 * (p[1] - cy).signum();
    }
    Some(quad)
}

/// Samples the 6x6 cell grid inside `quad`. `None` unless every border
/// cell is dark.
fn line_distance(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len = dx.hypot(dy);
    if len < 1e-9 {
        return (p[0] - a[0]).hypot(p[1] - a[1]);
    }
    ((p[0] - a[0]) * dy - (p[1] - a[1]) * dx).abs() / len
}

fn read_grid(image: &GrayImage, quad: &[[f64; 2]; 4], level: u8) -> Option<Grid> {
    let n = GRID_CELLS as f64;
    let h = homography_dlt(&[[0.0, 0.0], [n, 0.0], [n, n], [0.0, n]], quad)?;
    let (w, ht) = (image.width() as i64, image.height() as i64);

    let cell_is_light = |row: usize, col: usize| -> Option<bool> {
        let mut sum = 0u32;
        let mut count = 0u32;
        for dy in CELL_SAMPLES {
            for dx in CELL_SAMPLES {
                let [x, y] = apply_homography(&h, col as f64 + dx, row as f64 + dy)?;
                let (px, py) = (x.round() as i64, y.round() as i64);
                if px < 0 || py < 0 || px >= w || py >= ht {
                    return None;
                }
                sum += image.get_pixel(px as u32, py as u32)[0] as u32;
                count += 1;
            }
        }
        Some(sum / count > level as u32)
    };

    let mut grid = [[false; DATA_CELLS]; DATA_CELLS];
    for row in 0..GRID_CELLS {
        for col in 0..GRID_CELLS {
            let light = cell_is_light(row, col)?;
            let border = row == 0 || col == 0 || row == GRID_CELLS - 1 || col == GRID_CELLS - 1;
            if border {
                if light {
                    return None;
                }
            } else {
                grid[row - 1][col - 1] = light;
            }
        }
    }
    Some(grid)
}

fn grid_code(grid: &Grid) -> u32 {
    grid.iter()
        .flatten()
        .fold(0u32, |code, &bit| (code << 1) | bit as u32)
}

/// The grid as read when starting one corner further clockwise.
fn turn(grid: &Grid) -> Grid {
    let mut out = [[false; DATA_CELLS]; DATA_CELLS];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = grid[c][DATA_CELLS - 1 - r];
        }
    }
    out
}

/// `(id, turns)`: the minimal code over rotations and how many corner
/// shifts produce it. `None` for rotationally symmetric grids.
fn canonical_code(grid: &Grid) -> Option<(u32, usize)> {
    let mut codes = [0u32; 4];
    let mut g = *grid;
    for code in &mut codes {
        *code = grid_code(&g);
        g = turn(&g);
    }
    let (turns, &id) = codes.iter().enumerate().min_by_key(|&(_, c)| *c)?;
    if codes.iter().filter(|&&c| c == id).count() > 1 {
        return None;
    }
    Some((id, turns))
}

fn same_place(a: &[[f64; 2]; 4], b: &[[f64; 2]; 4]) -> bool {
    let centre = |q: &[[f64; 2]; 4]| {
        [
            q.iter().map(|p| p[0]).sum::<f64>() / 4.0,
            q.iter().map(|p| p[1]).sum::<f64>() / 4.0,
        ]
    };
    let (ca, cb) = (centre(a), centre(b));
    let side = (a[1][0] - a[0][0]).hypot(a[1][1] - a[0][1]);
    (ca[0] - cb[0]).hypot(ca[1] - cb[1]) < side / 4.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const CELL: u32 = 12;

    /// A 4x4 code with a single rotation that minimizes it.
    const CODE: u32 = 0b0001_0010_0110_1011;

    fn grid_from_code(code: u32) -> Grid {
        let mut grid = [[false; DATA_CELLS]; DATA_CELLS];
        for (i, cell) in grid.iter_mut().flatten().enumerate() {
            *cell = (code >> (15 - i)) & 1 == 1;
        }
        grid
    }

    /// White canvas with the marker's top-left border cell at `(x0, y0)`.
    fn render(code: u32, x0: u32, y0: u32, width: u32, height: u32) -> GrayImage {
        let grid = grid_from_code(code);
        let mut img = GrayImage::from_pixel(width, height, Luma([230]));
        let span = CELL * GRID_CELLS as u32;
        for y in 0..span {
            for x in 0..span {
                let (row, col) = ((y / CELL) as usize, (x / CELL) as usize);
                let inner = (1..=DATA_CELLS).contains(&row) && (1..=DATA_CELLS).contains(&col);
                let light = inner && grid[row - 1][col - 1];
                img.put_pixel(x0 + x, y0 + y, Luma([if light { 230 } else { 20 }]));
            }
        }
        img
    }

    fn frame(img: GrayImage) -> Frame {
        let (w, h) = img.dimensions();
        Frame::new(img.into_raw(), w, h, 1, 0)
    }

    #[test]
    fn test_canonical_code_is_rotation_invariant() {
        let grid = grid_from_code(CODE);
        let (id, _) = canonical_code(&grid).unwrap();
        let mut g = grid;
        for _ in 0..4 {
            g = turn(&g);
            assert_eq!(canonical_code(&g).unwrap().0, id);
        }
    }

    #[test]
    fn test_symmetric_grid_is_rejected() {
        assert!(canonical_code(&[[false; 4]; 4]).is_none());
        assert!(canonical_code(&grid_from_code(0b1001_0000_0000_1001)).is_none());
    }

    #[test]
    fn test_detects_upright_marker_with_corners() {
        let (id, turns) = canonical_code(&grid_from_code(CODE)).unwrap();
        assert_eq!(turns, 0, "test code should already be canonical");

        let img = render(CODE, 40, 30, 200, 160);
        let markers = SquareMarkerDetector::default().detect(&frame(img)).unwrap();

        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].id, id);
        let tl = markers[0].top_left();
        assert!((tl[0] - 40.0).abs() <= 1.0 && (tl[1] - 30.0).abs() <= 1.0, "{tl:?}");
        let br = markers[0].corners[2];
        assert!((br[0] - 112.0).abs() <= 1.0 && (br[1] - 102.0).abs() <= 1.0, "{br:?}");
    }

    #[test]
    fn test_rotated_marker_keeps_id_and_moves_top_left() {
        let upright = render(CODE, 40, 40, 160, 160);
        let rotated = image::imageops::rotate90(&upright);

        let mut detector = SquareMarkerDetector::default();
        let a = detector.detect(&frame(upright)).unwrap();
        let b = detector.detect(&frame(rotated)).unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].id, b[0].id);
        // Rotating 90° clockwise sends the top-left corner to the top-right.
        let tl = b[0].top_left();
        assert!(tl[0] > 80.0 && tl[1] < 80.0, "{tl:?}");
    }

    #[test]
    fn test_two_markers_detected() {
        let mut img = render(CODE, 10, 10, 240, 100);
        let other = render(0b0000_0001_0011_0111, 0, 0, 72, 72);
        image::imageops::replace(&mut img, &other, 150, 14);

        let markers = SquareMarkerDetector::default().detect(&frame(img)).unwrap();
        assert_eq!(markers.len(), 2);
        assert_ne!(markers[0].id, markers[1].id);
    }

    #[test]
    fn test_blank_frame_has_no_markers() {
        let img = GrayImage::from_pixel(64, 48, Luma([200]));
        assert!(SquareMarkerDetector::default()
            .detect(&frame(img))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_plain_dark_square_is_not_a_marker() {
        let mut img = GrayImage::from_pixel(120, 120, Luma([230]));
        for y in 20..92 {
            for x in 20..92 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        // All-dark data cells form a symmetric grid.
        assert!(SquareMarkerDetector::default()
            .detect(&frame(img))
            .unwrap()
            .is_empty());
    }
}
