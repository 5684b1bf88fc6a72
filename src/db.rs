use crate::grades::{self, SemesterRecord, SubjectRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "placement.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            register_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department TEXT,
            batch TEXT,
            email TEXT,
            phone TEXT,
            placement_status TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_results(
            student_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            sgpa REAL NOT NULL,
            total_credits REAL NOT NULL,
            source TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(student_id, semester),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_subjects(
            student_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            credit REAL NOT NULL,
            grade TEXT NOT NULL,
            grade_point REAL NOT NULL,
            PRIMARY KEY(student_id, semester, seq),
            FOREIGN KEY(student_id, semester)
                REFERENCES semester_results(student_id, semester) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn student_id_by_register_no(conn: &Connection, register_no: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM students WHERE register_no = ?",
        [register_no],
        |r| r.get(0),
    )
    .optional()
}

/// Replaces one student's semester, subjects included.
pub fn write_semester(
    conn: &Connection,
    student_id: &str,
    record: &SemesterRecord,
    source: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM semester_subjects WHERE student_id = ? AND semester = ?",
        params![student_id, record.semester],
    )?;
    conn.execute(
        "INSERT INTO semester_results(student_id, semester, sgpa, total_credits, source, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, semester) DO UPDATE SET
            sgpa = excluded.sgpa,
            total_credits = excluded.total_credits,
            source = excluded.source,
            updated_at = excluded.updated_at",
        params![
            student_id,
            record.semester,
            record.sgpa,
            record.total_credits,
            source,
            now_rfc3339()
        ],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO semester_subjects(student_id, semester, seq, code, name, credit, grade, grade_point)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (seq, s) in record.subjects.iter().enumerate() {
        stmt.execute(params![
            student_id,
            record.semester,
            seq as i64,
            s.code,
            s.name,
            s.credit,
            s.grade,
            s.grade_point
        ])?;
    }
    Ok(())
}

pub fn delete_semester(conn: &Connection, student_id: &str, semester: u8) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM semester_subjects WHERE student_id = ? AND semester = ?",
        params![student_id, semester],
    )?;
    conn.execute(
        "DELETE FROM semester_results WHERE student_id = ? AND semester = ?",
        params![student_id, semester],
    )
}

#[derive(Debug, Clone)]
pub struct StoredSemester {
    pub record: SemesterRecord,
    pub source: String,
    pub updated_at: Option<String>,
}

pub fn load_semesters(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<StoredSemester>> {
    let mut stmt = conn.prepare(
        "SELECT semester, sgpa, total_credits, source, updated_at
         FROM semester_results
         WHERE student_id = ?
         ORDER BY semester",
    )?;
    let heads = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, u8>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut sub_stmt = conn.prepare(
        "SELECT code, name, credit, grade, grade_point
         FROM semester_subjects
         WHERE student_id = ? AND semester = ?
         ORDER BY seq",
    )?;
    let mut out = Vec::with_capacity(heads.len());
    for (semester, sgpa, total_credits, source, updated_at) in heads {
        let subjects = sub_stmt
            .query_map(params![student_id, semester], |r| {
                Ok(SubjectRecord {
                    code: r.get(0)?,
                    name: r.get(1)?,
                    credit: r.get(2)?,
                    grade: r.get(3)?,
                    grade_point: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(StoredSemester {
            record: SemesterRecord {
                semester,
                subjects,
                sgpa,
                total_credits,
            },
            source,
            updated_at,
        });
    }
    Ok(out)
}

/// `(semester, sgpa, total_credits)` for every stored semester of a student.
pub fn semester_summaries(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<(u8, f64, f64)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT semester, sgpa, total_credits FROM semester_results
         WHERE student_id = ? ORDER BY semester",
    )?;
    let rows = stmt
        .query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_cgpa(conn: &Connection, student_id: &str) -> rusqlite::Result<f64> {
    let rows = semester_summaries(conn, student_id)?;
    Ok(grades::cgpa(rows.into_iter().map(|(_, sgpa, tc)| (sgpa, tc))))
}
