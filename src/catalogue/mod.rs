//! Offline device-catalogue generation.
//!
//! Reads a `PrefabData.json` dump (prefab names, hashes, logic points,
//! slot tables, modes) and emits the device-interface declarations the
//! front-end compiles against, plus a mode enum for every prefab whose
//! modes are well-formed identifiers.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::error::{CompileError, CompileResult};

fn default_true() -> bool {
    true
}

/// One logic point of a prefab (`Temperature`, `On`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicPoint {
    pub name: String,
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicInfo {
    #[serde(default)]
    pub logic_types: Vec<LogicPoint>,
    #[serde(default)]
    pub logic_slot_types: Vec<String>,
}

/// One entry of the prefab dump.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefabEntry {
    pub prefab_name: String,
    pub prefab_hash: i64,
    /// Mode index (as a decimal string key) to mode name.
    #[serde(default)]
    pub modes: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub logic: Option<LogicInfo>,
}

pub fn parse_prefab_data(json: &str) -> CompileResult<Vec<PrefabEntry>> {
    serde_json::from_str(json).map_err(|error| CompileError::Catalogue(error.to_string()))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Modes sorted by numeric index, or `None` when any key or name is
/// unusable as an enum member.
fn usable_modes(modes: &BTreeMap<String, String>) -> Option<Vec<(u32, &str)>> {
    if modes.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(modes.len());
    for (key, name) in modes {
        let index: u32 = key.parse().ok()?;
        if !is_identifier(name) {
            return None;
        }
        out.push((index, name.as_str()));
    }
    out.sort_unstable_by_key(|(index, _)| *index);
    Some(out)
}

/// Render the interface declarations for a parsed prefab list.
pub fn generate(entries: &[PrefabEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Generated from PrefabData.json; do not edit.");
    for entry in entries {
        let name = &entry.prefab_name;
        let logic = entry.logic.clone().unwrap_or_default();
        let _ = writeln!(out);
        let _ = writeln!(out, "[DeviceInterface(\"{name}\")] // hash {}", entry.prefab_hash);
        if !logic.logic_slot_types.is_empty() {
            let _ = writeln!(out, "[DeviceSlotCount({})]", logic.logic_slot_types.len());
        }
        let _ = writeln!(out, "public interface I{name} : IDevice");
        let _ = writeln!(out, "{{");
        for point in &logic.logic_types {
            let accessors = match (point.read, point.write) {
                (true, true) => "{ get; set; }",
                (false, true) => "{ set; }",
                _ => "{ get; }",
            };
            let _ = writeln!(out, "    float {} {accessors}", point.name);
        }
        if !logic.logic_slot_types.is_empty() {
            let _ = writeln!(out, "    IDeviceSlots Slots {{ get; }}");
        }
        let _ = writeln!(out, "}}");
        if let Some(modes) = entry.modes.as_ref().and_then(usable_modes) {
            let _ = writeln!(out);
            let _ = writeln!(out, "public enum {name}Mode");
            let _ = writeln!(out, "{{");
            for (index, mode) in modes {
                let _ = writeln!(out, "    {mode} = {index},");
            }
            let _ = writeln!(out, "}}");
        }
    }
    out
}

/// Parse and render in one step.
pub fn generate_from_json(json: &str) -> CompileResult<String> {
    Ok(generate(&parse_prefab_data(json)?))
}
