use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Anchor in the game UI that a tutorial entry points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlSymbol {
    #[serde(default)]
    pub section_frontend_path: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorialSectionEntry {
    pub id: u64,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub html_symbol: Option<HtmlSymbol>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl TutorialSectionEntry {
    /// Whether the entry can be shown while `route` is active. Entries not
    /// bound to a section apply everywhere.
    pub fn applies_to(&self, route: &str) -> bool {
        match self
            .html_symbol
            .as_ref()
            .and_then(|symbol| symbol.section_frontend_path.as_deref())
        {
            None | Some("") => true,
            Some(path) => path == route,
        }
    }
}
