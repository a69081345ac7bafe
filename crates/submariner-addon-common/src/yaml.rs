//! YAML decoding and emitting via yaml-rust2
//!
//! Rendered manifests are YAML; everything downstream works on
//! `serde_json::Value`, so documents are converted once here.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::yaml::Hash;
use yaml_rust2::{Yaml, YamlEmitter, YamlLoader};

/// Error raised for malformed or unsupported YAML
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct YamlError(String);

/// Decode every non-empty document of a YAML stream.
///
/// Documents separated by `---` become separate values; empty documents
/// (a trailing `---`, comment-only files) are dropped.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .filter(|doc| !doc.is_null())
        .map(to_json)
        .collect()
}

/// Decode a single YAML document. Empty input is `Value::Null`.
pub fn parse_document(input: &str) -> Result<Value, YamlError> {
    Ok(parse_documents(input)?
        .into_iter()
        .next()
        .unwrap_or(Value::Null))
}

/// Emit `value` as a YAML document (with a leading `---`)
pub fn to_yaml_string(value: &Value) -> Result<String, YamlError> {
    let mut out = String::new();
    YamlEmitter::new(&mut out)
        .dump(&from_json(value))
        .map_err(|e| YamlError(e.to_string()))?;
    out.push('\n');
    Ok(out)
}

fn from_json(value: &Value) -> Yaml {
    match value {
        Value::Null => Yaml::Null,
        Value::Bool(b) => Yaml::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Yaml::Integer(i),
            None => Yaml::Real(n.to_string()),
        },
        Value::String(s) => Yaml::String(s.clone()),
        Value::Array(items) => Yaml::Array(items.iter().map(from_json).collect()),
        Value::Object(map) => {
            let mut hash = Hash::new();
            for (k, v) in map {
                hash.insert(Yaml::String(k.clone()), from_json(v));
            }
            Yaml::Hash(hash)
        }
    }
}

fn to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => {
            let f: f64 = s.parse().map_err(|_| YamlError(format!("invalid float {s}")))?;
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(items.into_iter().map(to_json).collect::<Result<_, _>>()?),
        Yaml::Hash(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(key_to_string(k)?, to_json(v)?);
            }
            Value::Object(out)
        }
        // the loader resolves anchors, so an alias never reaches here
        Yaml::Alias(_) | Yaml::BadValue => return Err(YamlError("bad YAML value".to_string())),
    })
}

fn key_to_string(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(YamlError("unsupported YAML key type".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nested_manifest() {
        let doc = parse_document(
            r#"
apiVersion: v1
kind: Namespace
metadata:
  name: set1-broker
  labels:
    app: submariner
"#,
        )
        .unwrap();
        assert_eq!(doc["kind"], "Namespace");
        assert_eq!(doc["metadata"]["labels"]["app"], "submariner");
    }

    #[test]
    fn skips_empty_documents() {
        let docs = parse_documents("---\nkind: A\n---\n# comment only\n---\nkind: B\n").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["kind"], "B");
    }

    #[test]
    fn scalars_keep_their_types() {
        let doc = parse_document("port: 4500\nenabled: true\nratio: 0.5\nname: \"500\"").unwrap();
        assert_eq!(doc["port"], 4500);
        assert_eq!(doc["enabled"], true);
        assert_eq!(doc["ratio"], 0.5);
        assert_eq!(doc["name"], "500");
    }

    #[test]
    fn empty_input_is_null() {
        assert_eq!(parse_document("").unwrap(), Value::Null);
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(parse_documents("key: [unclosed").is_err());
    }

    #[test]
    fn emitted_yaml_parses_back() {
        let value = serde_json::json!({
            "kind": "CustomResourceDefinition",
            "spec": {"versions": [{"name": "v1alpha1", "served": true}], "ratio": 0.5},
        });

        let yaml = to_yaml_string(&value).unwrap();

        assert!(yaml.starts_with("---"));
        assert_eq!(parse_document(&yaml).unwrap(), value);
    }

    #[test]
    fn anchors_resolve_to_their_value() {
        let value = parse_document("a: &x 1\nb: *x").unwrap();
        assert_eq!(value, serde_json::json!({"a": 1, "b": 1}));
    }
}
