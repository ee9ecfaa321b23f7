use serde::{Deserialize, Serialize};

/// Placeholder names a binding template may reference.
pub const FIELD_NAMES: &[&str] = &["gender", "position", "band_genre", "expression", "venue"];

/// Free-text form fields supplied with a portrait request.
///
/// Deserializes from the booth form's camelCase names; the stage setting
/// also accepts its legacy `setPanggung` name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortraitFields {
    pub gender: String,
    pub position: String,
    pub band_genre: String,
    pub expression: String,
    #[serde(alias = "setPanggung")]
    pub venue: String,
}

impl PortraitFields {
    /// Look up a field by its placeholder name.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "gender" => Some(&self.gender),
            "position" => Some(&self.position),
            "band_genre" => Some(&self.band_genre),
            "expression" => Some(&self.expression),
            "venue" => Some(&self.venue),
            _ => None,
        }
    }
}

/// Backend-side names of the assets uploaded for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundAssets {
    /// Name of the subject photo in the backend's input store.
    pub subject: String,
    /// Name of the frame overlay, either uploaded or the configured default.
    pub frame: String,
}
