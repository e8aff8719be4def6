use std::path::{Path, PathBuf};

use ab_glyph::FontVec;

/// Well-known system font locations tried when no font is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Loads a TrueType/OpenType font for overlay labels.
pub fn load_font(path: &Path) -> Result<FontVec, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let font = FontVec::try_from_vec(bytes)
        .map_err(|e| format!("{} is not a usable font: {e}", path.display()))?;
    Ok(font)
}

/// The configured font if given, else the first loadable system font.
///
/// Returns `None` (and labels are not drawn) when nothing loads.
pub fn resolve_font(configured: Option<&Path>) -> Option<FontVec> {
    if let Some(path) = configured {
        match load_font(path) {
            Ok(font) => return Some(font),
            Err(e) => log::warn!("Label font {}: {e}", path.display()),
        }
    }
    let found = SYSTEM_FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .find_map(|p| load_font(&p).ok());
    if found.is_none() {
        log::warn!("No label font found; face names and marker ids will not be drawn");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_font_rejects_non_font_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("font.ttf");
        std::fs::write(&path, b"definitely not a font").unwrap();
        assert!(load_font(&path).is_err());
    }

    #[test]
    fn test_load_font_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_font(&dir.path().join("missing.ttf")).is_err());
    }
}
