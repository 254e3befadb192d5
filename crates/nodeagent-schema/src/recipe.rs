use crate::version::trim_version;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-component recipe read from `<component>/metadata.yaml`: base version →
/// install/uninstall resource groups.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Recipe {
    pub blocks: BTreeMap<String, RecipeBlock>,
}

impl Recipe {
    /// Recipe block for `version`; sub-versions share their base version's block.
    pub fn block(&self, component: &str, version: &str) -> Result<&RecipeBlock, SchemaError> {
        let base = trim_version(version);
        self.blocks
            .get(base)
            .ok_or_else(|| SchemaError::RecipeVersionNotFound {
                component: component.to_owned(),
                version: base.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RecipeBlock {
    #[serde(default)]
    pub install: Vec<ResourceGroup>,
    #[serde(default)]
    pub uninstall: Vec<ResourceGroup>,
}

/// One batch of side effects. Files are applied first, then services, then
/// scripts.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResourceGroup {
    #[serde(default)]
    pub files: Vec<FileOp>,
    #[serde(default)]
    pub services: Vec<ServiceOp>,
    #[serde(default)]
    pub scripts: Vec<ScriptOp>,
}

impl ResourceGroup {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.services.is_empty() && self.scripts.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase", deny_unknown_fields)]
pub enum FileOp {
    /// Copy the source bytes as-is.
    File(FileSpec),
    /// Render the source against the template context, then write it.
    Template(FileSpec),
    /// Create a directory, converging mode and ownership if it already exists.
    Directory {
        dst: String,
        mode: FileMode,
        owner: String,
        group: String,
    },
    /// Recursively remove the destination; a missing path is not an error.
    Absent { dst: String },
}

impl FileOp {
    pub fn dst(&self) -> &str {
        match self {
            FileOp::File(spec) | FileOp::Template(spec) => &spec.dst,
            FileOp::Directory { dst, .. } | FileOp::Absent { dst } => dst,
        }
    }
}

/// Source and destination of a copied or rendered file. A `dst` ending in `/`
/// places the file under that directory with the source's base name.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    pub src: String,
    pub dst: String,
    pub mode: FileMode,
    pub owner: String,
    pub group: String,
}

/// Unix permission bits, written as an octal string (`"0644"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileMode(u32);

impl FileMode {
    pub const fn new(bits: u32) -> Self {
        Self(bits & 0o7777)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl TryFrom<String> for FileMode {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
        match u32::from_str_radix(digits, 8) {
            Ok(bits) if !digits.is_empty() && bits <= 0o7777 => Ok(Self(bits)),
            _ => Err(SchemaError::InvalidMode(value)),
        }
    }
}

impl From<FileMode> for String {
    fn from(mode: FileMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceOp {
    pub name: String,
    pub state: ServiceState,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Started,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Started => write!(f, "started"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScriptOp {
    pub cmd: String,
}

pub fn parse_recipe(component: &str, input: &[u8]) -> Result<Recipe, SchemaError> {
    serde_yaml::from_slice(input).map_err(|source| SchemaError::Parse {
        document: format!("recipe of component {component}"),
        source,
    })
}
