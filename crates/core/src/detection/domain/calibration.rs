use nalgebra::{Matrix3, Vector3};

/// Pinhole intrinsics plus OpenCV-ordered distortion coefficients
/// `(k1, k2, p1, p2[, k3, ...])`.
///
/// Only the five Brown-Conrady terms are modelled; any further
/// coefficients (rational or thin-prism) are kept but ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraCalibration {
    camera_matrix: Matrix3<f64>,
    distortion: Vec<f64>,
}

const UNDISTORT_ITERS: usize = 15;
const UNDISTORT_EPS: f64 = 1e-12;

impl CameraCalibration {
    /// Returns `None` when the focal lengths are zero or any entry is
    /// not finite.
    pub fn new(camera_matrix: Matrix3<f64>, distortion: Vec<f64>) -> Option<Self> {
        let finite = camera_matrix.iter().all(|v| v.is_finite())
            && distortion.iter().all(|v| v.is_finite());
        if !finite || camera_matrix[(0, 0)].abs() < 1e-12 || camera_matrix[(1, 1)].abs() < 1e-12 {
            return None;
        }
        Some(Self {
            camera_matrix,
            distortion,
        })
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion(&self) -> &[f64] {
        &self.distortion
    }

    pub fn fx(&self) -> f64 {
        self.camera_matrix[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.camera_matrix[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.camera_matrix[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.camera_matrix[(1, 2)]
    }

    fn coefficient(&self, i: usize) -> f64 {
        self.distortion.get(i).copied().unwrap_or(0.0)
    }

    fn distort_normalized(&self, xy: [f64; 2]) -> [f64; 2] {
        let (k1, k2, p1, p2, k3) = (
            self.coefficient(0),
            self.coefficient(1),
            self.coefficient(2),
            self.coefficient(3),
            self.coefficient(4),
        );
        let [x, y] = xy;
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let x_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        [x * radial + x_tan, y * radial + y_tan]
    }

    /// Projects a camera-frame point to distorted pixel coordinates.
    ///
    /// `None` for points at or behind the camera plane.
    pub fn project(&self, point: &Vector3<f64>) -> Option<[f64; 2]> {
        if point.z <= 1e-9 {
            return None;
        }
        let [xd, yd] = self.distort_normalized([point.x / point.z, point.y / point.z]);
        let px = [self.fx() * xd + self.cx(), self.fy() * yd + self.cy()];
        (px[0].is_finite() && px[1].is_finite()).then_some(px)
    }

    /// Maps a distorted pixel to undistorted normalized coordinates by
    /// fixed-point iteration.
    pub fn undistort_to_normalized(&self, pixel: [f64; 2]) -> Option<[f64; 2]> {
        let xd = [
            (pixel[0] - self.cx()) / self.fx(),
            (pixel[1] - self.cy()) / self.fy(),
        ];
        let (k1, k2, p1, p2, k3) = (
            self.coefficient(0),
            self.coefficient(1),
            self.coefficient(2),
            self.coefficient(3),
            self.coefficient(4),
        );
        let [mut x, mut y] = xd;
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let dx_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            let x_next = (xd[0] - dx_tan) / radial;
            let y_next = (xd[1] - dy_tan) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }
            let step = (x_next - x).hypot(y_next - y);
            x = x_next;
            y = y_next;
            if step <= UNDISTORT_EPS {
                break;
            }
        }
        Some([x, y])
    }
}
