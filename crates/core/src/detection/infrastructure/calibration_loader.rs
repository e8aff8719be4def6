//! Camera calibration files.
//!
//! Accepts OpenCV FileStorage YAML (`%YAML:1.0` header, `!!opencv-matrix`
//! nodes with `rows`, `cols`, `dt`, `data`) and the same layout as JSON.
//! Matrices may also be written as plain row-major lists or nested rows.

use std::path::{Path, PathBuf};

use nalgebra::Matrix3;
use serde::Deserialize;
use thiserror::Error;

use crate::detection::domain::calibration::CameraCalibration;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("failed to read calibration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse calibration {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("calibration is missing `{0}`")]
    MissingKey(&'static str),
    #[error("calibration `{key}` has the wrong shape: {reason}")]
    Shape { key: &'static str, reason: String },
    #[error("calibration camera matrix is degenerate or not finite")]
    Invalid,
}

#[derive(Debug, Deserialize)]
struct MatrixNode {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatrixValue {
    Node(MatrixNode),
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

impl MatrixValue {
    /// Row-major values plus `(rows, cols)`.
    fn into_parts(self, key: &'static str) -> Result<(Vec<f64>, usize, usize), CalibrationError> {
        match self {
            Self::Node(node) => {
                if node.rows * node.cols != node.data.len() {
                    return Err(CalibrationError::Shape {
                        key,
                        reason: format!(
                            "{}x{} declared but {} values given",
                            node.rows,
                            node.cols,
                            node.data.len()
                        ),
                    });
                }
                Ok((node.data, node.rows, node.cols))
            }
            Self::Flat(data) => {
                let len = data.len();
                Ok((data, 1, len))
            }
            Self::Nested(rows) => {
                let cols = rows.first().map_or(0, Vec::len);
                if rows.iter().any(|r| r.len() != cols) {
                    return Err(CalibrationError::Shape {
                        key,
                        reason: "rows have different lengths".into(),
                    });
                }
                let n = rows.len();
                Ok((rows.into_iter().flatten().collect(), n, cols))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationFile {
    camera_matrix: Option<MatrixValue>,
    #[serde(alias = "dist_coeeff", alias = "distortion_coefficients")]
    dist_coeff: Option<MatrixValue>,
}

/// Reads a calibration file; `.json` files are parsed as JSON, anything
/// else as (OpenCV) YAML.
pub fn load_calibration(path: &Path) -> Result<CameraCalibration, CalibrationError> {
    let text = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let file: CalibrationFile = if is_json {
        serde_json::from_str(&text).map_err(|e| CalibrationError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&strip_opencv_yaml(&text)).map_err(|e| CalibrationError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };
    from_file(file)
}

/// Drops the `%YAML:1.0` directive and `!!opencv-*` tags, which plain
/// YAML parsers reject or treat as enum tags.
fn strip_opencv_yaml(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("%YAML"))
        .map(|line| {
            line.split(' ')
                .filter(|token| !token.starts_with("!!opencv-"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn from_file(file: CalibrationFile) -> Result<CameraCalibration, CalibrationError> {
    let (matrix, rows, cols) = file
        .camera_matrix
        .ok_or(CalibrationError::MissingKey("camera_matrix"))?
        .into_parts("camera_matrix")?;
    if (rows, cols) != (3, 3) && !(rows == 1 && cols == 9) {
        return Err(CalibrationError::Shape {
            key: "camera_matrix",
            reason: format!("expected 3x3, got {rows}x{cols}"),
        });
    }

    let (distortion, rows, cols) = file
        .dist_coeff
        .ok_or(CalibrationError::MissingKey("dist_coeff"))?
        .into_parts("dist_coeff")?;
    if rows != 1 && cols != 1 {
        return Err(CalibrationError::Shape {
            key: "dist_coeff",
            reason: format!("expected a vector, got {rows}x{cols}"),
        });
    }

    CameraCalibration::new(Matrix3::from_row_slice(&matrix), distortion)
        .ok_or(CalibrationError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    const OPENCV_YAML: &str = "%YAML:1.0
---
camera_matrix: !!opencv-matrix
   rows: 3
   cols: 3
   dt: d
   data: [ 6.1e+02, 0., 3.2e+02, 0., 6.05e+02, 2.4e+02, 0., 0., 1. ]
dist_coeeff: !!opencv-matrix
   rows: 1
   cols: 5
   dt: d
   data: [ -0.12, 0.05, 1.0e-03, -2.0e-03, 0. ]
";

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_loads_opencv_yaml_with_misspelled_key() {
        let dir = tempfile::tempdir().unwrap();
        let calib = load_calibration(&write(dir.path(), "robo_cam.yaml", OPENCV_YAML)).unwrap();

        assert_relative_eq!(calib.fx(), 610.0);
        assert_relative_eq!(calib.fy(), 605.0);
        assert_relative_eq!(calib.cx(), 320.0);
        assert_relative_eq!(calib.cy(), 240.0);
        assert_eq!(calib.distortion().len(), 5);
        assert_relative_eq!(calib.distortion()[0], -0.12);
    }

    #[test]
    fn test_loads_json_with_nested_rows() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{
            "camera_matrix": [[500, 0, 100], [0, 500, 80], [0, 0, 1]],
            "dist_coeff": [0.1, 0.0, 0.0, 0.0]
        }"#;
        let calib = load_calibration(&write(dir.path(), "cam.json", json)).unwrap();
        assert_relative_eq!(calib.cx(), 100.0);
        assert_eq!(calib.distortion(), &[0.1, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_calibration(&dir.path().join("robo_cam.yaml"));
        assert!(matches!(result, Err(CalibrationError::Io { .. })));
    }

    #[rstest]
    #[case::no_distortion(
        "camera_matrix: [600, 0, 320, 0, 600, 240, 0, 0, 1]\n",
        "MissingKey"
    )]
    #[case::no_matrix("dist_coeff: [0, 0, 0, 0, 0]\n", "MissingKey")]
    #[case::wrong_shape(
        "camera_matrix: [600, 0, 320, 0, 600, 240]\ndist_coeff: [0, 0, 0, 0]\n",
        "Shape"
    )]
    #[case::count_mismatch(
        "camera_matrix:\n  rows: 3\n  cols: 3\n  data: [1, 2, 3]\ndist_coeff: [0]\n",
        "Shape"
    )]
    #[case::zero_focal(
        "camera_matrix: [0, 0, 320, 0, 0, 240, 0, 0, 1]\ndist_coeff: [0, 0, 0, 0]\n",
        "Invalid"
    )]
    #[case::not_yaml("camera_matrix: [1, 2\n", "Parse")]
    fn test_malformed_calibration(#[case] text: &str, #[case] expected: &str) {
        let dir = tempfile::tempdir().unwrap();
        let err = load_calibration(&write(dir.path(), "bad.yaml", text)).unwrap_err();
        let kind = match err {
            CalibrationError::Io { .. } => "Io",
            CalibrationError::Parse { .. } => "Parse",
            CalibrationError::MissingKey(_) => "MissingKey",
            CalibrationError::Shape { .. } => "Shape",
            CalibrationError::Invalid => "Invalid",
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn test_strip_opencv_yaml_removes_directive_and_tags() {
        let stripped = strip_opencv_yaml(OPENCV_YAML);
        assert!(!stripped.contains("%YAML"));
        assert!(!stripped.contains("!!opencv"));
        assert!(stripped.contains("camera_matrix:"));
    }
}
