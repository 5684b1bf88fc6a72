use crate::db;
use crate::grades;
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::helpers::{
    get_optional_str, get_register_number, get_required_str, is_register_number,
    non_empty_trimmed, parse_student_filters, HandlerErr, StudentFilters,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub register_number: String,
    pub name: String,
    pub department: Option<String>,
    pub batch: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub placement_status: Option<String>,
    pub updated_at: Option<String>,
}

const STUDENT_COLUMNS: &str =
    "id, register_no, name, department, batch, email, phone, placement_status, updated_at";

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        register_number: r.get(1)?,
        name: r.get(2)?,
        department: r.get(3)?,
        batch: r.get(4)?,
        email: r.get(5)?,
        phone: r.get(6)?,
        placement_status: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

pub fn list_students(conn: &Connection) -> Result<Vec<StudentRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM students ORDER BY register_no",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_student(conn: &Connection, register_no: &str) -> Result<StudentRow, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE register_no = ?", STUDENT_COLUMNS);
    conn.query_row(&sql, [register_no], student_from_row)
        .optional()?
        .ok_or_else(|| {
            HandlerErr::new("not_found", "student not found")
                .with_details(json!({ "registerNumber": register_no }))
        })
}

fn filtered_students(
    conn: &Connection,
    filters: &StudentFilters,
) -> Result<Vec<(StudentRow, f64)>, HandlerErr> {
    let mut out = Vec::new();
    for s in list_students(conn)? {
        if !filters.matches_profile(
            s.department.as_deref(),
            s.batch.as_deref(),
            s.placement_status.as_deref(),
        ) {
            continue;
        }
        let cgpa = db::student_cgpa(conn, &s.id)?;
        if !filters.matches_cgpa(cgpa) {
            continue;
        }
        out.push((s, cgpa));
    }
    Ok(out)
}

fn handle_students_list(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let filters = parse_student_filters(req.params.get("filters"))?;
    let rows = filtered_students(conn, &filters)?;
    let students = rows
        .into_iter()
        .map(|(s, cgpa)| {
            let mut v = json!(s);
            v["cgpa"] = json!(cgpa);
            v
        })
        .collect::<Vec<_>>();
    Ok(json!({ "students": students }))
}

fn handle_students_create(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let register_no = get_register_number(&req.params)?;
    let name = get_required_str(&req.params, "name")?;
    let department = get_optional_str(&req.params, "department")?;
    let batch = get_optional_str(&req.params, "batch")?;
    let email = get_optional_str(&req.params, "email")?;
    let phone = get_optional_str(&req.params, "phone")?;
    let placement_status = get_optional_str(&req.params, "placementStatus")?;

    if db::student_id_by_register_no(conn, &register_no)?.is_some() {
        return Err(HandlerErr::new("conflict", "register number already exists")
            .with_details(json!({ "registerNumber": register_no })));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, register_no, name, department, batch, email, phone, placement_status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &register_no,
            &name,
            &department,
            &batch,
            &email,
            &phone,
            &placement_status,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    log::info!("student created: {}", register_no);
    Ok(json!({ "studentId": id }))
}

fn patch_optional(
    patch: &Value,
    key: &str,
    current: &mut Option<String>,
) -> Result<(), HandlerErr> {
    if patch.get(key).is_some() {
        *current = get_optional_str(patch, key)?;
    }
    Ok(())
}

fn handle_students_update(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let register_no = get_register_number(&req.params)?;
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut s = find_student(conn, &register_no)?;

    for k in patch.as_object().map(|o| o.keys()).into_iter().flatten() {
        match k.as_str() {
            "name" | "department" | "batch" | "email" | "phone" | "placementStatus" => {}
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown student field: {}",
                    other
                )))
            }
        }
    }
    if patch.get("name").is_some() {
        s.name = get_required_str(patch, "name")?;
    }
    patch_optional(patch, "department", &mut s.department)?;
    patch_optional(patch, "batch", &mut s.batch)?;
    patch_optional(patch, "email", &mut s.email)?;
    patch_optional(patch, "phone", &mut s.phone)?;
    patch_optional(patch, "placementStatus", &mut s.placement_status)?;

    conn.execute(
        "UPDATE students
         SET name = ?, department = ?, batch = ?, email = ?, phone = ?, placement_status = ?, updated_at = ?
         WHERE id = ?",
        (
            &s.name,
            &s.department,
            &s.batch,
            &s.email,
            &s.phone,
            &s.placement_status,
            db::now_rfc3339(),
            &s.id,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn handle_students_delete(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let register_no = get_register_number(&req.params)?;
    let s = find_student(conn, &register_no)?;
    conn.execute("DELETE FROM students WHERE id = ?", [&s.id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    log::info!("student deleted: {}", register_no);
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Clone)]
struct RosterRow {
    line_no: usize,
    register_no: String,
    name: String,
    department: Option<String>,
    batch: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    placement_status: Option<String>,
}

fn parse_roster_csv(path: &Path) -> Result<(Vec<RosterRow>, Vec<Value>), HandlerErr> {
    let io_err = |e: csv::Error| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": path.to_string_lossy() }))
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(io_err)?;

    let headers = reader.headers().map_err(io_err)?.clone();
    let mut idx = HashMap::<String, usize>::new();
    for (i, h) in headers.iter().enumerate() {
        idx.insert(h.to_ascii_lowercase(), i);
    }
    let col = |names: &[&str]| names.iter().find_map(|n| idx.get(*n).copied());
    let Some(reg_col) = col(&["register_no", "register_number", "regno", "register number"]) else {
        return Err(HandlerErr::bad_params("roster csv needs a register_no column"));
    };
    let name_col = col(&["name", "student_name"]);
    let department_col = col(&["department", "dept"]);
    let batch_col = col(&["batch", "year"]);
    let email_col = col(&["email"]);
    let phone_col = col(&["phone", "mobile"]);
    let status_col = col(&["placement_status", "status"]);

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // Line 1 is the header.
        let line_no = i + 2;
        let record = record.map_err(io_err)?;
        let field = |c: Option<usize>| c.and_then(|c| record.get(c)).and_then(non_empty_trimmed);

        let register_no = field(Some(reg_col)).unwrap_or_default();
        if !is_register_number(&register_no) {
            warnings.push(json!({
                "line": line_no,
                "code": "bad_register_number",
                "message": "register number must be 10 to 12 digits"
            }));
            continue;
        }
        let Some(name) = field(name_col) else {
            warnings.push(json!({
                "line": line_no,
                "code": "missing_name",
                "message": "name is required"
            }));
            continue;
        };
        rows.push(RosterRow {
            line_no,
            register_no,
            name,
            department: field(department_col),
            batch: field(batch_col),
            email: field(email_col),
            phone: field(phone_col),
            placement_status: field(status_col),
        });
    }
    Ok((rows, warnings))
}

fn handle_students_import_roster(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let path = get_required_str(&req.params, "path")?;
    let (rows, warnings) = parse_roster_csv(Path::new(&path))?;
    for w in &warnings {
        log::warn!("roster import {}: {}", path, w);
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut created = 0usize;
    let mut updated = 0usize;
    for r in &rows {
        let now = db::now_rfc3339();
        let write = match db::student_id_by_register_no(&tx, &r.register_no)? {
            Some(id) => {
                updated += 1;
                tx.execute(
                    "UPDATE students
                     SET name = ?, department = ?, batch = ?, email = ?, phone = ?, placement_status = ?, updated_at = ?
                     WHERE id = ?",
                    (
                        &r.name,
                        &r.department,
                        &r.batch,
                        &r.email,
                        &r.phone,
                        &r.placement_status,
                        &now,
                        &id,
                    ),
                )
            }
            None => {
                created += 1;
                tx.execute(
                    "INSERT INTO students(id, register_no, name, department, batch, email, phone, placement_status, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &r.register_no,
                        &r.name,
                        &r.department,
                        &r.batch,
                        &r.email,
                        &r.phone,
                        &r.placement_status,
                        &now,
                    ),
                )
            }
        };
        if let Err(e) = write {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "line": r.line_no })));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    log::info!(
        "roster import {}: {} created, {} updated, {} warnings",
        path,
        created,
        updated,
        warnings.len()
    );
    Ok(json!({
        "created": created,
        "updated": updated,
        "warnings": warnings
    }))
}

fn handle_students_export_roster(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = get_required_str(&req.params, "outPath")?;
    let filters = parse_student_filters(req.params.get("filters"))?;
    let setup = load_section(conn, SetupSection::Export)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let include_semesters = match req.params.get("includeSemesters") {
        None | Some(Value::Null) => setup
            .get("includeSemesters")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("includeSemesters must be boolean"))?,
    };
    let delimiter = setup
        .get("delimiter")
        .and_then(|v| v.as_str())
        .and_then(|s| s.bytes().next())
        .unwrap_or(b',');

    let rows = filtered_students(conn, &filters)?;

    let out = Path::new(&out_path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    }
    let write_err = |e: csv::Error| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    };
    let mut w = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(out)
        .map_err(write_err)?;

    let mut header = vec![
        "register_no".to_string(),
        "name".into(),
        "department".into(),
        "batch".into(),
        "placement_status".into(),
        "cgpa".into(),
    ];
    if include_semesters {
        header.extend((grades::MIN_SEMESTER..=grades::MAX_SEMESTER).map(|n| format!("sem{}", n)));
    }
    w.write_record(&header).map_err(write_err)?;

    for (s, cgpa) in &rows {
        let mut record = vec![
            s.register_number.clone(),
            s.name.clone(),
            s.department.clone().unwrap_or_default(),
            s.batch.clone().unwrap_or_default(),
            s.placement_status.clone().unwrap_or_default(),
            format!("{:.2}", cgpa),
        ];
        if include_semesters {
            let by_sem: HashMap<u8, f64> = db::semester_summaries(conn, &s.id)?
                .into_iter()
                .map(|(sem, sgpa, _)| (sem, sgpa))
                .collect();
            for n in grades::MIN_SEMESTER..=grades::MAX_SEMESTER {
                record.push(
                    by_sem
                        .get(&n)
                        .map(|v| format!("{:.2}", v))
                        .unwrap_or_default(),
                );
            }
        }
        w.write_record(&record).map_err(write_err)?;
    }
    w.flush()
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    Ok(json!({
        "rowsExported": rows.len(),
        "path": out_path,
        "includeSemesters": include_semesters
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Request) -> Result<Value, HandlerErr> = match req.method.as_str()
    {
        "students.list" => handle_students_list,
        "students.create" => handle_students_create,
        "students.update" => handle_students_update,
        "students.delete" => handle_students_delete,
        "students.importRoster" => handle_students_import_roster,
        "students.exportRoster" => handle_students_export_roster,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(
            HandlerErr::new("no_workspace", "select a workspace first").response(&req.id),
        );
    };
    Some(match handler(conn, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
