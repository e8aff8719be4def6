use crate::detection::domain::face_encoder::Embedding;
use crate::shared::constants::UNKNOWN_FACE_LABEL;

/// Default Euclidean distance at or below which two L2-normalized
/// embeddings count as the same person (cosine similarity >= ~0.4).
pub const DEFAULT_MATCH_TOLERANCE: f64 = 1.1;

/// One `name filename` line of the known-face listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: String,
    pub file: String,
}

/// Parses the known-face listing.
///
/// Each line holds exactly two whitespace-separated fields. Parsing stops
/// at the first line that does not, so a trailing blank line or comment
/// ends the listing instead of failing it.
pub fn parse_registry(text: &str) -> Vec<RegistryEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, file] = fields.as_slice() else {
            break;
        };
        entries.push(RegistryEntry {
            name: name.to_string(),
            file: file.to_string(),
        });
    }
    entries
}

#[derive(Clone, Debug, PartialEq)]
pub struct KnownFace {
    pub name: String,
    pub embedding: Embedding,
}

/// Ordered, immutable table of known identities.
///
/// Order matters: when several entries match a face, the first one wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KnownFaceRegistry {
    faces: Vec<KnownFace>,
}

impl KnownFaceRegistry {
    pub fn new(faces: Vec<KnownFace>) -> Self {
        Self { faces }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn faces(&self) -> &[KnownFace] {
        &self.faces
    }
}

/// Distance-based identity matching against a [`KnownFaceRegistry`].
#[derive(Clone, Copy, Debug)]
pub struct FaceMatcher {
    tolerance: f64,
}

impl FaceMatcher {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// One boolean per registry entry, in registry order.
    pub fn compare(&self, registry: &KnownFaceRegistry, candidate: &[f32]) -> Vec<bool> {
        registry
            .faces()
            .iter()
            .map(|known| euclidean_distance(&known.embedding, candidate) <= self.tolerance)
            .collect()
    }

    /// Name of the first matching entry, or `"Unknown"`.
    pub fn identify<'a>(&self, registry: &'a KnownFaceRegistry, candidate: &[f32]) -> &'a str {
        self.compare(registry, candidate)
            .iter()
            .position(|&m| m)
            .map(|i| registry.faces()[i].name.as_str())
            .unwrap_or(UNKNOWN_FACE_LABEL)
    }
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_TOLERANCE)
    }
}

/// Embeddings of different lengths never match.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
