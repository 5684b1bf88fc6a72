use crate::db;
use crate::grades::{self, SemesterRecord, SubjectRecord};
use crate::ingest::{self, IngestResult};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::handlers::students::find_student;
use crate::ipc::helpers::{get_register_number, get_required_str, get_semester, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sheet::{self, GradeSheet};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

struct IngestSettings {
    default_semester: u8,
    report_unrecognized: bool,
}

fn ingest_settings(conn: Option<&Connection>, params: &Value) -> Result<IngestSettings, HandlerErr> {
    let setup = match conn {
        Some(c) => Some(
            load_section(c, SetupSection::Ingest)
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?,
        ),
        None => None,
    };
    let configured = setup
        .as_ref()
        .and_then(|s| s.get("defaultSemester"))
        .and_then(|v| v.as_i64())
        .filter(|n| grades::is_valid_semester(*n))
        .map(|n| n as u8)
        .unwrap_or(grades::MIN_SEMESTER);
    let report_unrecognized = setup
        .as_ref()
        .and_then(|s| s.get("reportUnrecognizedGrades"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    Ok(IngestSettings {
        default_semester: get_semester(params, "defaultSemester")?.unwrap_or(configured),
        report_unrecognized,
    })
}

fn load_sheet(params: &Value) -> Result<GradeSheet, HandlerErr> {
    if let Some(rows) = params.get("rows").filter(|v| !v.is_null()) {
        return GradeSheet::from_json_rows(rows).map_err(|e| HandlerErr::bad_params(e.to_string()));
    }
    let path = get_required_str(params, "path")
        .map_err(|_| HandlerErr::bad_params("missing path or rows"))?;
    sheet::load_grade_sheet(Path::new(&path)).map_err(|e| {
        HandlerErr::new("sheet_load_failed", e.to_string()).with_details(json!({ "path": path }))
    })
}

fn run_ingest(conn: Option<&Connection>, params: &Value) -> Result<IngestResult, HandlerErr> {
    let settings = ingest_settings(conn, params)?;
    let sheet = load_sheet(params)?;
    let mut result = ingest::ingest(&sheet, settings.default_semester).map_err(|e| {
        log::info!("grade sheet rejected: {}", e);
        HandlerErr::new("ingest_rejected", e.to_string()).with_details(json!({ "kind": e.kind() }))
    })?;
    if !settings.report_unrecognized {
        result.unrecognized_grades.clear();
    }
    log::info!(
        "grade sheet ingested: {} records, {} skipped rows",
        result.records.len(),
        result.skipped_rows
    );
    Ok(result)
}

fn handle_ingest_preview(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let result = run_ingest(state.db.as_ref(), &req.params)?;
    let mut out = json!(result);
    out["cgpaByStudent"] = json!(result.cgpa_by_student());
    Ok(out)
}

/// Roster lookup; 12-digit numbers also match a roster entry holding the last 10 digits.
fn resolve_student_id(conn: &Connection, register_no: &str) -> rusqlite::Result<Option<String>> {
    if let Some(id) = db::student_id_by_register_no(conn, register_no)? {
        return Ok(Some(id));
    }
    if register_no.len() == 12 {
        return db::student_id_by_register_no(conn, &register_no[2..]);
    }
    Ok(None)
}

fn handle_ingest_apply(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let result = run_ingest(Some(conn), &req.params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut updated: HashSet<String> = HashSet::new();
    let mut not_found: BTreeSet<String> = BTreeSet::new();
    let mut records_applied = 0usize;
    for r in &result.records {
        let Some(student_id) = resolve_student_id(&tx, &r.register_number)? else {
            not_found.insert(r.register_number.clone());
            continue;
        };
        if let Err(e) = db::write_semester(&tx, &student_id, &r.semester, "upload") {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({
                "registerNumber": r.register_number,
                "semester": r.semester.semester
            })));
        }
        updated.insert(student_id);
        records_applied += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log::info!(
        "grade sheet applied: {} students updated, {} not in roster",
        updated.len(),
        not_found.len()
    );
    Ok(json!({
        "updated": updated.len(),
        "notFound": not_found,
        "recordsApplied": records_applied,
        "semesterDistribution": result.semester_distribution,
        "skippedRows": result.skipped_rows,
        "unrecognizedGrades": result.unrecognized_grades
    }))
}

fn parse_manual_subjects(raw: Option<&Value>) -> Result<Vec<SubjectRecord>, HandlerErr> {
    let Some(items) = raw.and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("subjects must be an array"));
    };
    if items.is_empty() {
        return Err(HandlerErr::bad_params("subjects must not be empty"));
    }
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let code = get_required_str(item, "code")
            .map_err(|_| HandlerErr::bad_params(format!("subjects[{}].code is required", i)))?;
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(&code)
            .to_string();
        let credit = item
            .get("credit")
            .and_then(|v| v.as_f64())
            .filter(|n| n.is_finite() && *n >= 0.0)
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("subjects[{}].credit must be a number >= 0", i))
            })?;
        let grade = get_required_str(item, "grade")
            .map_err(|_| HandlerErr::bad_params(format!("subjects[{}].grade is required", i)))?;
        if !grades::is_manual_grade(&grade) {
            return Err(HandlerErr::bad_params(format!(
                "subjects[{}].grade must be one of: {}",
                i,
                grades::MANUAL_SCALE.join(", ")
            )));
        }
        out.push(SubjectRecord::new(&code, &name, credit, &grade));
    }
    Ok(out)
}

fn handle_semester_upsert(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let register_no = get_register_number(&req.params)?;
    let Some(semester) = get_semester(&req.params, "semester")? else {
        return Err(HandlerErr::bad_params("missing semester"));
    };
    let subjects = parse_manual_subjects(req.params.get("subjects"))?;
    let student = find_student(conn, &register_no)?;

    let record = SemesterRecord::from_subjects(semester, subjects);
    db::write_semester(conn, &student.id, &record, "manual")
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    let cgpa = db::student_cgpa(conn, &student.id)?;
    Ok(json!({
        "sgpa": record.sgpa,
        "totalCredits": record.total_credits,
        "cgpa": cgpa
    }))
}

fn handle_semester_delete(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let register_no = get_register_number(&req.params)?;
    let Some(semester) = get_semester(&req.params, "semester")? else {
        return Err(HandlerErr::bad_params("missing semester"));
    };
    let student = find_student(conn, &register_no)?;
    let removed = db::delete_semester(conn, &student.id, semester)
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "semester not found")
            .with_details(json!({ "registerNumber": register_no, "semester": semester })));
    }
    Ok(json!({ "ok": true }))
}

fn handle_student_get(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let register_no = get_register_number(&req.params)?;
    let student = find_student(conn, &register_no)?;
    let stored = db::load_semesters(conn, &student.id)?;
    let cgpa = grades::cgpa(
        stored
            .iter()
            .map(|s| (s.record.sgpa, s.record.total_credits)),
    );
    let semesters = stored
        .into_iter()
        .map(|s| {
            let mut v = json!(s.record);
            v["source"] = json!(s.source);
            v["updatedAt"] = json!(s.updated_at);
            v
        })
        .collect::<Vec<_>>();
    Ok(json!({
        "student": student,
        "semesters": semesters,
        "cgpa": cgpa
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    if req.method == "results.ingestPreview" {
        return Some(match handle_ingest_preview(state, req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        });
    }
    let handler: fn(&Connection, &Request) -> Result<Value, HandlerErr> = match req.method.as_str()
    {
        "results.ingestApply" => handle_ingest_apply,
        "results.semesterUpsert" => handle_semester_upsert,
        "results.semesterDelete" => handle_semester_delete,
        "results.studentGet" => handle_student_get,
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
