use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub mod settings;

pub use settings::SyncSettings;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub async fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let raw = tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("read config: {p}"))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&raw).with_context(|| format!("parse yaml: {p}"))?;
        let layer = serde_json::to_value(layer).context("yaml->json conversion failed")?;
        merged = merge_layers(merged, layer);
    }

    let canonical = canonical_json(&merged);
    let config_hash = hex::encode(Sha256::digest(canonical.as_bytes()));

    Ok(LoadedConfig {
        config_json: merged,
        canonical_json: canonical,
        config_hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Empty config (all settings at defaults). Used when no config files
    /// are supplied on the command line.
    pub fn empty() -> Self {
        LoadedConfig {
            config_json: Value::Object(Default::default()),
            canonical_json: "{}".to_string(),
            config_hash: String::new(),
        }
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings::from_value(&self.config_json)
    }
}

/// Deep-merge one layer over a base: objects merge key-wise and recurse,
/// everything else (arrays included) is replaced by the overlay.
fn merge_layers(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut under), Value::Object(over)) => {
            for (key, incoming) in over {
                let merged = match under.remove(&key) {
                    Some(existing) => merge_layers(existing, incoming),
                    None => incoming,
                };
                under.insert(key, merged);
            }
            Value::Object(under)
        }
        (_, overlay) => overlay,
    }
}

/// Canonical compact JSON: object keys emitted in sorted order, written
/// directly into the output buffer so no intermediate tree is built.
fn canonical_json(v: &Value) -> String {
    let mut out = String::new();
    write_canonical(v, &mut out);
    out
}

fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            // Scalars (incl. string escaping) delegate to serde_json; only
            // containers need the explicit ordering above.
            out.push_str(
                &serde_json::to_string(scalar).expect("scalar serialization must not fail"),
            );
        }
    }
}
