use crate::domain::model::{value_to_index, InstanceInfo};
use crate::utils::error::{MumuError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type InstanceMap = BTreeMap<u32, InstanceInfo>;

fn invalid(message: impl Into<String>, raw: &str) -> MumuError {
    MumuError::InvalidOutput {
        message: message.into(),
        raw: raw.to_string(),
    }
}

/// Parses `info -v all` output. MuMuManager has shipped several shapes over
/// time: one object per line, an array, an object keyed by index, or a single
/// object for a single instance.
pub fn parse_instances(output: &str) -> Result<InstanceMap> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(InstanceMap::new());
    }

    let json_lines: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .collect();

    if json_lines.len() > 1 {
        let objects: std::result::Result<Vec<Value>, _> =
            json_lines.iter().map(|line| serde_json::from_str(line)).collect();
        if let Ok(objects) = objects {
            if objects.iter().all(has_index) {
                return Ok(objects
                    .iter()
                    .filter_map(|obj| obj.as_object())
                    .filter_map(|obj| InstanceInfo::from_json(obj, None))
                    .map(|info| (info.index, info))
                    .collect());
            }
        }
    }

    let data: Value = serde_json::from_str(trimmed)
        .map_err(|e| invalid(format!("JSON parse error: {}", e), output))?;

    match data {
        Value::Array(items) => Ok(parse_array(&items)),
        Value::Object(object) => Ok(parse_object(&object)),
        _ => Err(invalid("unsupported data format", output)),
    }
}

/// Parses `info -v <index>` output for a single instance.
pub fn parse_single_instance(output: &str, index: u32) -> Result<InstanceInfo> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(invalid(format!("no data for instance {}", index), output));
    }

    let data: Value = serde_json::from_str(trimmed).map_err(|e| {
        invalid(format!("JSON parse error for instance {}: {}", index, e), output)
    })?;

    let object = data
        .as_object()
        .ok_or_else(|| invalid(format!("data for instance {} is not an object", index), output))?;

    if object.is_empty() {
        return Err(invalid(format!("empty object for instance {}", index), output));
    }
    if !object.contains_key("index") && !object.contains_key("name") {
        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        return Err(invalid(
            format!("instance {} is missing basic fields (keys: {:?})", index, keys),
            output,
        ));
    }

    InstanceInfo::from_json(object, Some(index))
        .ok_or_else(|| invalid(format!("unreadable index for instance {}", index), output))
}

fn has_index(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.contains_key("index"))
        .unwrap_or(false)
}

fn parse_array(items: &[Value]) -> InstanceMap {
    let keyed_by_index = items.iter().all(has_index);

    items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let object = item.as_object()?;
            let fallback = if keyed_by_index {
                None
            } else {
                u32::try_from(position).ok()
            };
            InstanceInfo::from_json(object, fallback)
        })
        .map(|info| (info.index, info))
        .collect()
}

fn parse_object(object: &Map<String, Value>) -> InstanceMap {
    if !object.is_empty() && object.values().all(has_index) {
        return object
            .values()
            .filter_map(Value::as_object)
            .filter_map(|obj| InstanceInfo::from_json(obj, None))
            .map(|info| (info.index, info))
            .collect();
    }

    if object.contains_key("index") {
        return InstanceInfo::from_json(object, None)
            .map(|info| BTreeMap::from([(info.index, info)]))
            .unwrap_or_default();
    }

    object
        .iter()
        .filter_map(|(key, value)| {
            let nested = value.as_object()?;
            let fallback = value_to_index(&Value::String(key.clone()));
            InstanceInfo::from_json(nested, fallback)
        })
        .map(|info| (info.index, info))
        .collect()
}
