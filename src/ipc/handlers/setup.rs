use crate::db;
use crate::grades;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    Ingest,
    Export,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest" => Some(Self::Ingest),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Ingest => "setup.ingest",
            Self::Export => "setup.export",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Ingest => json!({
            "defaultSemester": 1,
            "reportUnrecognizedGrades": true
        }),
        SetupSection::Export => json!({
            "includeSemesters": true,
            "delimiter": ","
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

/// Validated value for one section key.
fn section_value(section: SetupSection, k: &str, v: &Value) -> Result<Value, String> {
    match section {
        SetupSection::Ingest => match k {
            "defaultSemester" => parse_i64_range(
                v,
                k,
                grades::MIN_SEMESTER as i64,
                grades::MAX_SEMESTER as i64,
            )
            .map(Value::from),
            "reportUnrecognizedGrades" => parse_bool(v, k).map(Value::Bool),
            _ => Err(format!("unknown ingest field: {}", k)),
        },
        SetupSection::Export => match k {
            "includeSemesters" => parse_bool(v, k).map(Value::Bool),
            "delimiter" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| format!("{} must be string", k))?;
                if s != "," && s != ";" {
                    return Err("delimiter must be one of: , ;".into());
                }
                Ok(Value::String(s.to_string()))
            }
            _ => Err(format!("unknown export field: {}", k)),
        },
    }
}

/// All-or-nothing: the first invalid key rejects the whole patch.
fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let mut validated = Vec::with_capacity(patch.len());
    for (k, v) in patch {
        validated.push((k.clone(), section_value(section, k, v)?));
    }
    let obj = as_object_mut(current)?;
    obj.extend(validated);
    Ok(())
}

/// Section defaults overlaid with stored values. Stored keys that no longer validate
/// are skipped one by one; the rest still apply.
fn merge_stored_section(section: SetupSection, current: &mut Value, saved: &Map<String, Value>) {
    let Some(obj) = current.as_object_mut() else {
        return;
    };
    for (k, v) in saved {
        match section_value(section, k, v) {
            Ok(value) => {
                obj.insert(k.clone(), value);
            }
            Err(msg) => log::warn!("ignoring stored {} value: {}", section.key(), msg),
        }
    }
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            merge_stored_section(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let ingest = match load_section(conn, SetupSection::Ingest) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let export = match load_section(conn, SetupSection::Export) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "ingest": ingest, "export": export }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
