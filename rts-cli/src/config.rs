use std::path::Path;

use script::Limits;
use serde::Deserialize;

/// Contents of a `--config` file. Every field is optional; flags override
/// whatever the file sets.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub limits: LimitsConfig,
    pub allow_random: Option<bool>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_string: Option<usize>,
    pub max_list: Option<usize>,
    pub max_dict: Option<usize>,
    pub max_depth: Option<usize>,
    pub max_nesting: Option<usize>,
}

impl LimitsConfig {
    /// Overlays the fields that are set onto `base`.
    pub fn apply(&self, mut base: Limits) -> Limits {
        if let Some(value) = self.max_string {
            base.max_string = value;
        }
        if let Some(value) = self.max_list {
            base.max_list = value;
        }
        if let Some(value) = self.max_dict {
            base.max_dict = value;
        }
        if let Some(value) = self.max_depth {
            base.max_depth = value;
        }
        if let Some(value) = self.max_nesting {
            base.max_nesting = value;
        }
        base
    }
}

pub fn load(path: &Path) -> Result<FileConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read config '{}': {err}", path.display()))?;
    parse(&text).map_err(|err| format!("invalid config '{}': {err}", path.display()))
}

fn parse(text: &str) -> Result<FileConfig, serde_json::Error> {
    serde_json::from_str(text)
}
