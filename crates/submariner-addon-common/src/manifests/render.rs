//! Template rendering for embedded manifest assets
//!
//! Assets are YAML files compiled into the binary. Placeholders use the
//! default minijinja syntax (`{{ BrokerNamespace }}`, `{% if IsOpenShift %}`)
//! and undefined variables are an error, so a missing config field never
//! renders as an empty string.

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;

use super::kinds::Manifest;
use crate::error::ManifestError;
use crate::yaml::parse_documents;

/// A template compiled into the binary
#[derive(Clone, Copy, Debug)]
pub struct Asset {
    /// Path used in logs and errors
    pub path: &'static str,
    /// Template source
    pub content: &'static str,
}

/// Declare an [`Asset`] from a file next to the calling crate's manifest dir
#[macro_export]
macro_rules! asset {
    ($path:literal) => {
        $crate::manifests::Asset {
            path: $path,
            content: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/", $path)),
        }
    };
}

/// Renders assets into YAML text, JSON values, or typed manifests
pub struct ManifestRenderer {
    env: Environment<'static>,
    assets: &'static [Asset],
}

impl ManifestRenderer {
    /// Create a renderer over a fixed asset table
    pub fn new(assets: &'static [Asset]) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_filter("b64enc", b64enc);
        env.add_filter("quote", quote);
        env.add_filter("yaml_bool", yaml_bool);
        Self { env, assets }
    }

    /// Paths of every asset, in table order
    pub fn files(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.assets.iter().map(|a| a.path)
    }

    fn asset(&self, file: &str) -> Result<&'static Asset, ManifestError> {
        self.assets
            .iter()
            .find(|a| a.path == file)
            .ok_or_else(|| ManifestError::MissingAsset(file.to_string()))
    }

    /// Render `file` to YAML text
    pub fn render<C: Serialize>(&self, file: &str, config: &C) -> Result<String, ManifestError> {
        let asset = self.asset(file)?;
        self.env
            .render_str(asset.content, config)
            .map_err(|e| ManifestError::Template {
                file: file.to_string(),
                message: e.to_string(),
            })
    }

    /// Render `file` and decode every document to JSON
    pub fn render_values<C: Serialize>(
        &self,
        file: &str,
        config: &C,
    ) -> Result<Vec<Value>, ManifestError> {
        decode_values(file, &self.render(file, config)?)
    }

    /// Render `file` and decode it into typed manifests
    pub fn render_manifests<C: Serialize>(
        &self,
        file: &str,
        config: &C,
    ) -> Result<Vec<Manifest>, ManifestError> {
        decode_manifests(file, &self.render(file, config)?)
    }
}

/// Decode rendered YAML text into JSON documents
pub fn decode_values(file: &str, text: &str) -> Result<Vec<Value>, ManifestError> {
    parse_documents(text).map_err(|e| ManifestError::Decode {
        file: file.to_string(),
        message: e.to_string(),
    })
}

/// Decode rendered YAML text into typed manifests
pub fn decode_manifests(file: &str, text: &str) -> Result<Vec<Manifest>, ManifestError> {
    decode_values(file, text)?
        .into_iter()
        .map(|value| Manifest::decode(file, value))
        .collect()
}

fn b64enc(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Plain `{{ flag }}` prints `True`/`False`, which YAML reads as strings
fn yaml_bool(value: bool) -> String {
    value.to_string()
}
