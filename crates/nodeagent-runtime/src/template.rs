use crate::RuntimeError;
use minijinja::{Environment, UndefinedBehavior};
use nodeagent_schema::{trim_version, NodeMetadata};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// A bare field reference in the `{{ .Key }}` form, optionally with `-`
/// whitespace trimming.
const FIELD_REFERENCE: &str =
    r"\{\{(-?)\s*\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*(-?)\}\}";

fn field_reference() -> Result<&'static Regex, RuntimeError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FIELD_REFERENCE))
        .as_ref()
        .map_err(|e| RuntimeError::Template(e.to_string()))
}

/// Processor architecture of this host, spelled the way release artifacts are
/// named (`amd64`, `arm64`, ...).
pub fn go_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}

/// Values recipe templates are rendered against.
///
/// Templates use Jinja syntax (`{% for t in NodeTaints %}`, `{% if HasGPU %}`,
/// filters such as `join` or `default`). A bare `{{ .Key }}` or
/// `{{ .TemplateArgs.key }}` reference is accepted as well and reads the same
/// value as `{{ Key }}`. Referencing an undefined value is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    values: Map<String, Value>,
}

impl TemplateContext {
    /// Context for source/destination paths: `Version` (trimmed) and `Arch`.
    pub fn for_path(version: &str) -> Self {
        let mut ctx = Self::default();
        ctx.insert("Version", trim_version(version));
        ctx.insert("Arch", go_arch());
        ctx
    }

    /// Context for file contents: the path context plus every node metadata
    /// field.
    pub fn for_file(version: &str, metadata: &NodeMetadata) -> Self {
        let mut ctx = Self::for_path(version);
        for (key, value) in metadata.template_values() {
            ctx.values.entry(key).or_insert(value);
        }
        ctx
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn render(&self, input: &str) -> Result<String, RuntimeError> {
        let source = field_reference()?.replace_all(input, "{{$1 $2 $3}}");
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.render_str(&source, &self.values)
            .map_err(|e| RuntimeError::Template(format!("{e:#}")))
    }
}
