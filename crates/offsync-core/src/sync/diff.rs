//! Field-level JSON diffs used to build merge proposals.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::ActionPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Modify,
    Delete,
}

/// One field change; `path` is dot-separated (`fields.display_name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
}

/// Patches that turn `old` into `new`. Nested objects are diffed per field;
/// any other value is replaced whole. Non-object inputs count as empty.
pub fn generate_patches(old: &Value, new: &Value) -> Vec<Patch> {
    let empty = Map::new();
    let mut patches = Vec::new();
    diff_objects(
        old.as_object().unwrap_or(&empty),
        new.as_object().unwrap_or(&empty),
        "",
        &mut patches,
    );
    patches
}

fn diff_objects(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<Patch>,
) {
    for (key, current) in new {
        let path = join(prefix, key);
        match old.get(key) {
            None => out.push(Patch {
                op: PatchOp::Add,
                path,
                value: Some(current.clone()),
                old_value: None,
            }),
            Some(Value::Object(before)) if current.is_object() => {
                if let Some(after) = current.as_object() {
                    diff_objects(before, after, &path, out);
                }
            }
            Some(before) if before != current => out.push(Patch {
                op: PatchOp::Modify,
                path,
                value: Some(current.clone()),
                old_value: Some(before.clone()),
            }),
            Some(_) => {}
        }
    }

    for (key, before) in old {
        if !new.contains_key(key) {
            out.push(Patch {
                op: PatchOp::Delete,
                path: join(prefix, key),
                value: None,
                old_value: Some(before.clone()),
            });
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Apply patches to a copy of `data`, creating intermediate objects as needed.
pub fn apply_patches(data: &Value, patches: &[Patch]) -> Result<Value> {
    let mut result = if data.is_object() {
        data.clone()
    } else {
        Value::Object(Map::new())
    };

    for patch in patches {
        let mut keys: Vec<&str> = patch.path.split('.').collect();
        let last = keys
            .pop()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("invalid patch path: {:?}", patch.path)))?;

        let mut target = &mut result;
        for key in keys {
            let object = target.as_object_mut().ok_or_else(|| {
                Error::InvalidInput(format!("patch path {} crosses a non-object", patch.path))
            })?;
            target = object
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let object = target.as_object_mut().ok_or_else(|| {
            Error::InvalidInput(format!("patch path {} crosses a non-object", patch.path))
        })?;
        match patch.op {
            PatchOp::Add | PatchOp::Modify => {
                let value = patch.value.clone().ok_or_else(|| {
                    Error::InvalidInput(format!("patch for {} has no value", patch.path))
                })?;
                object.insert(last.to_string(), value);
            }
            PatchOp::Delete => {
                object.remove(last);
            }
        }
    }

    Ok(result)
}

/// Merge two payloads of the same type: start from the remote payload and
/// layer on every field the local payload adds or changes. Fields only the
/// remote side has are kept.
pub fn propose_merge(local: &ActionPayload, remote: &ActionPayload) -> Result<ActionPayload> {
    if local.action_type() != remote.action_type() {
        return Err(Error::InvalidInput(format!(
            "cannot merge {} with {}",
            local.action_type(),
            remote.action_type()
        )));
    }

    let remote_value = remote.to_value()?;
    let patches: Vec<Patch> = generate_patches(&remote_value, &local.to_value()?)
        .into_iter()
        .filter(|patch| patch.op != PatchOp::Delete)
        .collect();
    ActionPayload::from_value(apply_patches(&remote_value, &patches)?)
}
