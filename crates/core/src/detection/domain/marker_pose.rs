//! Single-marker pose from four corners: planar homography (DLT with
//! Hartley normalization) decomposed into rotation and translation.

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::detection::domain::calibration::CameraCalibration;

/// Smallest corner quadrilateral (px²) a pose is estimated for.
const MIN_QUAD_AREA: f64 = 4.0;

/// Marker-to-camera transform: `p_cam = rotation * p_marker + translation`.
///
/// Marker frame: origin at the marker centre, x right, y up, z out of the
/// printed face. Units follow the marker side length (metres).
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl MarkerPose {
    pub fn transform(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }
}

/// Marker-frame corner coordinates matching [`DetectedMarker`] ordering.
///
/// [`DetectedMarker`]: crate::detection::domain::marker_detector::DetectedMarker
pub fn marker_object_points(side: f64) -> [[f64; 2]; 4] {
    let h = side / 2.0;
    [[-h, h], [h, h], [h, -h], [-h, -h]]
}

/// Estimates the marker pose from its four image corners.
///
/// Returns `None` for degenerate corner sets (collinear points, failed
/// undistortion) or a non-positive side length.
pub fn estimate_pose(
    corners: &[[f64; 2]; 4],
    calibration: &CameraCalibration,
    side: f64,
) -> Option<MarkerPose> {
    if side.is_nan() || side <= 0.0 || quad_area(corners) < MIN_QUAD_AREA {
        return None;
    }
    let mut image = [[0.0; 2]; 4];
    for (dst, c) in image.iter_mut().zip(corners) {
        *dst = calibration.undistort_to_normalized(*c)?;
    }
    let h = homography_dlt(&marker_object_points(side), &image)?;

    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let norm = (h1.norm() + h2.norm()) / 2.0;
    if norm < 1e-12 {
        return None;
    }
    // The marker must lie in front of the camera.
    let lambda = if h3.z < 0.0 { -1.0 / norm } else { 1.0 / norm };

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = approx.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        rotation = u_fixed * v_t;
    }

    let translation = h3 * lambda;
    if !translation.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(MarkerPose {
        rotation,
        translation,
    })
}

/// Pixel positions of the pose origin and the tips of its x, y and z axes.
pub fn project_axes(
    pose: &MarkerPose,
    calibration: &CameraCalibration,
    length: f64,
) -> Option<[[f64; 2]; 4]> {
    let points = [
        Vector3::zeros(),
        Vector3::new(length, 0.0, 0.0),
        Vector3::new(0.0, length, 0.0),
        Vector3::new(0.0, 0.0, length),
    ];
    let mut out = [[0.0; 2]; 4];
    for (dst, p) in out.iter_mut().zip(&points) {
        *dst = calibration.project(&pose.transform(p))?;
    }
    Some(out)
}

/// Maps `(x, y)` through `h`. `None` at the line at infinity.
pub fn apply_homography(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if p.z.abs() < 1e-15 {
        return None;
    }
    Some([p.x / p.z, p.y / p.z])
}

/// Shoelace area, unsigned.
fn quad_area(c: &[[f64; 2]; 4]) -> f64 {
    let twice: f64 = (0..4)
        .map(|i| {
            let j = (i + 1) % 4;
            c[i][0] * c[j][1] - c[j][0] * c[i][1]
        })
        .sum();
    twice.abs() / 2.0
}

/// Translates the centroid to the origin and scales the mean distance to √2.
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| (p[0] - cx).hypot(p[1] - cy))
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();
    (t, normalized)
}

/// Homography `H` with `dst ≈ H * src` from four or more correspondences.
pub fn homography_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }
    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let [sx, sy] = src_n[i];
        let [dx, dy] = dst_n[i];

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of AᵀA with the smallest eigenvalue.
    let eig = nalgebra::SymmetricEigen::new(a.transpose() * &a);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eig.eigenvectors.column(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let denorm = t_dst.try_inverse()? * hn * t_src;
    let scale = denorm[(2, 2)];
    if scale.abs() < 1e-15 || !denorm.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(denorm / scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::calibration::tests::test_calibration;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn facing_pose(tilt: f64, t: Vector3<f64>) -> MarkerPose {
        // Marker facing the camera (z toward the lens), then tilted about x.
        let facing = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
        let tilt = Rotation3::from_axis_angle(&Vector3::x_axis(), tilt).into_inner();
        MarkerPose {
            rotation: tilt * facing,
            translation: t,
        }
    }

    fn project_corners(
        pose: &MarkerPose,
        calib: &CameraCalibration,
        side: f64,
    ) -> [[f64; 2]; 4] {
        let mut out = [[0.0; 2]; 4];
        for (dst, p) in out.iter_mut().zip(marker_object_points(side)) {
            *dst = calib
                .project(&pose.transform(&Vector3::new(p[0], p[1], 0.0)))
                .unwrap();
        }
        out
    }

    #[test]
    fn test_fronto_parallel_pose_recovered() {
        let calib = test_calibration(vec![]);
        let truth = facing_pose(0.0, Vector3::new(0.02, -0.01, 0.5));
        let corners = project_corners(&truth, &calib, 0.05);

        let pose = estimate_pose(&corners, &calib, 0.05).unwrap();

        assert_relative_eq!(pose.translation, truth.translation, epsilon = 1e-5);
        assert_relative_eq!(pose.rotation, truth.rotation, epsilon = 1e-5);
    }

    #[test]
    fn test_tilted_pose_with_distortion_recovered() {
        let calib = test_calibration(vec![-0.1, 0.02, 0.0005, -0.0005, 0.0]);
        let truth = facing_pose(0.4, Vector3::new(-0.05, 0.03, 0.7));
        let corners = project_corners(&truth, &calib, 0.05);

        let pose = estimate_pose(&corners, &calib, 0.05).unwrap();

        assert_relative_eq!(pose.translation, truth.translation, epsilon = 1e-5);
        assert_relative_eq!(pose.rotation, truth.rotation, epsilon = 1e-5);
    }

    #[test]
    fn test_degenerate_corners_yield_none() {
        let calib = test_calibration(vec![]);
        let corners = [[10.0, 10.0]; 4];
        assert!(estimate_pose(&corners, &calib, 0.05).is_none());
    }

    #[test]
    fn test_homography_maps_unit_square_onto_quad() {
        let src = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let dst = [[10.0, 20.0], [110.0, 25.0], [105.0, 130.0], [5.0, 120.0]];
        let h = homography_dlt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let p = apply_homography(&h, s[0], s[1]).unwrap();
            assert_relative_eq!(p[0], d[0], epsilon = 1e-6);
            assert_relative_eq!(p[1], d[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_zero_side_yields_none() {
        let calib = test_calibration(vec![]);
        let corners = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        assert!(estimate_pose(&corners, &calib, 0.0).is_none());
    }

    #[test]
    fn test_project_axes_origin_is_marker_centre() {
        let calib = test_calibration(vec![]);
        let pose = facing_pose(0.0, Vector3::new(0.0, 0.0, 0.5));
        let axes = project_axes(&pose, &calib, 0.05).unwrap();

        assert_relative_eq!(axes[0][0], 320.0, epsilon = 1e-9);
        assert_relative_eq!(axes[0][1], 240.0, epsilon = 1e-9);
        // x axis points right in the image, y axis up.
        assert!(axes[1][0] > axes[0][0]);
        assert!(axes[2][1] < axes[0][1]);
    }
}
