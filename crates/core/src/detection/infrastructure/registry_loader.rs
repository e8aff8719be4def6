use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::detection::domain::face_encoder::FaceEncoder;
use crate::detection::domain::known_faces::{
    parse_registry, KnownFace, KnownFaceRegistry, RegistryEntry,
};
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read known-face listing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the `name filename` listing at `path` and encodes every listed
/// image. Image paths are relative to the listing's directory.
pub fn load_registry(
    path: &Path,
    encoder: &mut dyn FaceEncoder,
) -> Result<KnownFaceRegistry, RegistryError> {
    let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = parse_registry(&text);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let registry = KnownFaceRegistry::build(&entries, dir, encoder);
    log::info!(
        "Loaded {} of {} known faces from {}",
        registry.len(),
        entries.len(),
        path.display()
    );
    Ok(registry)
}

impl KnownFaceRegistry {
    /// Encodes each entry's image and keeps the first face found in it.
    ///
    /// Entries whose image can't be read or contains no face are skipped
    /// with a warning; registry order follows the listing.
    pub fn build(entries: &[RegistryEntry], dir: &Path, encoder: &mut dyn FaceEncoder) -> Self {
        let mut faces = Vec::with_capacity(entries.len());
        for entry in entries {
            let image_path = dir.join(&entry.file);
            let frame = match image::open(&image_path) {
                Ok(img) => Frame::from_rgb_image(img.to_rgb8(), 0),
                Err(e) => {
                    log::warn!("Skipping {}: cannot read {}: {e}", entry.name, image_path.display());
                    continue;
                }
            };
            match encoder.encode(&frame) {
                Ok(observations) => match observations.into_iter().next() {
                    Some(first) => faces.push(KnownFace {
                        name: entry.name.clone(),
                        embedding: first.embedding,
                    }),
                    None => log::warn!(
                        "Skipping {}: no face found in {}",
                        entry.name,
                        image_path.display()
                    ),
                },
                Err(e) => log::warn!("Skipping {}: encoding failed: {e}", entry.name),
            }
        }
        Self::new(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_encoder::FaceObservation;
    use crate::shared::region::Region;
    use image::{Rgb, RgbImage};

    /// Encodes an image as its top-left pixel value; pure black has no face.
    struct PixelEncoder;

    impl FaceEncoder for PixelEncoder {
        fn encode(
            &mut self,
            frame: &Frame,
        ) -> Result<Vec<FaceObservation>, Box<dyn std::error::Error>> {
            let px = &frame.data()[..3];
            if px.iter().all(|&v| v == 0) {
                return Ok(Vec::new());
            }
            Ok(vec![FaceObservation {
                region: Region::new(0, 0, frame.width() as i32, frame.height() as i32),
                embedding: px.iter().map(|&v| v as f32).collect(),
            }])
        }
    }

    fn save(dir: &Path, name: &str, color: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(color))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_load_registry_keeps_listing_order() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "a.png", [10, 0, 0]);
        save(dir.path(), "b.png", [0, 20, 0]);
        let listing = dir.path().join("faces.txt");
        std::fs::write(&listing, "alice a.png\nbob b.png\n").unwrap();

        let registry = load_registry(&listing, &mut PixelEncoder).unwrap();

        let names: Vec<_> = registry.faces().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(registry.faces()[1].embedding, vec![0.0, 20.0, 0.0]);
    }

    #[test]
    fn test_missing_image_and_faceless_image_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "blank.png", [0, 0, 0]);
        save(dir.path(), "c.png", [5, 5, 5]);
        let entries = parse_registry("ghost missing.png\nnobody blank.png\ncarol c.png\n");

        let registry = KnownFaceRegistry::build(&entries, dir.path(), &mut PixelEncoder);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.faces()[0].name, "carol");
    }

    #[test]
    fn test_listing_stops_at_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "a.png", [1, 1, 1]);
        save(dir.path(), "b.png", [2, 2, 2]);
        let listing = dir.path().join("faces.txt");
        std::fs::write(&listing, "alice a.png\n# comment line\nbob b.png\n").unwrap();

        let registry = load_registry(&listing, &mut PixelEncoder).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_listing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_registry(&dir.path().join("faces.txt"), &mut PixelEncoder);
        assert!(matches!(result, Err(RegistryError::Io { .. })));
    }
}
