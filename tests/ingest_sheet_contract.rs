#[path = "../src/grades.rs"]
mod grades;
#[path = "../src/ingest.rs"]
mod ingest;
#[path = "../src/sheet.rs"]
mod sheet;

use ingest::{ingest, IngestError, SkipReason};
use serde_json::json;
use sheet::GradeSheet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn fixture_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(rel)
}

fn sheet(rows: serde_json::Value) -> GradeSheet {
    GradeSheet::from_json_rows(&rows).expect("rows")
}

fn sem6_sheet() -> GradeSheet {
    sheet(json!([
        ["Semester", 6, 6, 6],
        ["Credit", 3, 2, 4],
        ["Code", "CCS332", "CCS334", "CCS336"],
        ["Name", "OS", "CN", "BDA"],
        ["label", "label", "label", "label"],
        ["Nithishwaran", "710022104002", "A", "B+", "O"]
    ]))
}

#[test]
fn worked_example_produces_one_semester_record() {
    let res = ingest(&sem6_sheet(), 1).expect("ingest");
    assert_eq!(res.records.len(), 1);
    let r = &res.records[0];
    assert_eq!(r.register_number, "710022104002");
    assert_eq!(r.student_name.as_deref(), Some("Nithishwaran"));
    assert_eq!(r.row_number, 6);
    assert_eq!(r.semester.semester, 6);

    let got: Vec<(&str, f64, &str, f64)> = r
        .semester
        .subjects
        .iter()
        .map(|s| (s.code.as_str(), s.credit, s.grade.as_str(), s.grade_point))
        .collect();
    assert_eq!(
        got,
        vec![
            ("CCS332", 3.0, "A", 8.0),
            ("CCS334", 2.0, "B+", 7.0),
            ("CCS336", 4.0, "O", 10.0),
        ]
    );
    assert_eq!(r.semester.subjects[0].name, "OS");
    assert_eq!(r.semester.total_credits, 9.0);
    // (8*3 + 7*2 + 10*4) / 9 = 8.666..
    assert_eq!(r.semester.sgpa, 8.67);

    assert_eq!(res.semester_distribution.get(&6), Some(&1));
    assert_eq!(res.skipped_rows, 0);
    assert!(res.unrecognized_grades.is_empty());
}

#[test]
fn ingest_is_deterministic() {
    let s = sem6_sheet();
    let a = ingest(&s, 3).expect("first");
    let b = ingest(&s, 3).expect("second");
    assert_eq!(a, b);
}

#[test]
fn five_or_fewer_non_empty_rows_is_empty_sheet() {
    let s = sheet(json!([
        ["Semester", 6],
        [null, "  "],
        ["Credit", 3],
        ["Code", "CCS332"],
        [],
        ["Name", "OS"],
        ["label", "label"]
    ]));
    assert_eq!(ingest(&s, 1), Err(IngestError::EmptySheet { found: 5 }));
    assert_eq!(
        ingest(&GradeSheet::default(), 1),
        Err(IngestError::EmptySheet { found: 0 })
    );
}

#[test]
fn missing_subject_codes_is_rejected() {
    let s = sheet(json!([
        ["Semester", 6, 6],
        ["Credit", 3, 2],
        ["Subject code", null, "  "],
        ["Name", "OS", "CN"],
        ["label", "label", "label"],
        ["Asha", "710022104002", "A", "B"]
    ]));
    assert_eq!(ingest(&s, 1), Err(IngestError::NoSubjectColumns));
}

#[test]
fn no_usable_student_rows_is_rejected() {
    let s = sheet(json!([
        ["Semester", 6, 6],
        ["Credit", 3, 2],
        ["Code", "CCS332", "CCS334"],
        ["Name", "OS", "CN"],
        ["label", "label", "label"],
        ["Asha", "no number", "A", "B"],
        ["Ravi", "710022104009", "Pass", "95%"]
    ]));
    let e = ingest(&s, 1).expect_err("rejected");
    assert_eq!(e, IngestError::NoValidStudentRows);
    assert_eq!(e.kind(), "no_valid_student_rows");
    assert!(e.to_string().contains("expected rows"));
}

#[test]
fn semester_backfill_uses_nearest_mapped_column() {
    let s = sheet(json!([
        [null, null, 6, null, null, 8],
        ["Credit", 1, 1, 1, 1, 1],
        ["Subject code", "S1", "S2", "S3", "S4", "S5"],
        ["Name", "one", "two", "three", "four", "five"],
        ["label"],
        ["Asha", "710022104002", "O", "O", "O", "O", "O"]
    ]));
    let res = ingest(&s, 1).expect("ingest");
    let sem_of = |code: &str| {
        res.subject_columns
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.semester)
    };
    assert_eq!(sem_of("S1"), Some(6));
    assert_eq!(sem_of("S2"), Some(6));
    assert_eq!(sem_of("S3"), Some(6));
    assert_eq!(sem_of("S4"), Some(8));
    assert_eq!(sem_of("S5"), Some(8));
}

#[test]
fn default_semester_applies_when_row_zero_has_no_markers() {
    let s = sheet(json!([
        ["Results", "Anna University"],
        ["Credit", 3],
        ["Code", "GE3151"],
        ["Name", "Python"],
        ["label"],
        ["Asha", "710022104002", "B"]
    ]));
    let res = ingest(&s, 2).expect("ingest");
    assert_eq!(res.records[0].semester.semester, 2);
    assert_eq!(res.subject_columns[0].semester, 2);
}

#[test]
fn invalid_grade_tokens_are_ignored() {
    let s = sheet(json!([
        ["Semester", 6, 6, 6],
        ["Credit", 3, 2, 4],
        ["Code", "CCS332", "CCS334", "CCS336"],
        ["Name", "OS", "CN", "BDA"],
        ["label", "label", "label", "label"],
        ["Asha", "710022104002", "95%", "Pass", "O"],
        ["Ravi", "710022104003", "Pass", "95%", "a+"]
    ]));
    let res = ingest(&s, 1).expect("ingest");
    assert_eq!(res.records.len(), 1);
    let subjects = &res.records[0].semester.subjects;
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].code, "CCS336");
    assert_eq!(res.records[0].semester.sgpa, 10.0);

    assert_eq!(res.skipped_rows, 1);
    assert_eq!(res.skipped[0].row_number, 7);
    assert_eq!(res.skipped[0].reason, SkipReason::NoGrades);
}

#[test]
fn zero_credit_semester_has_zero_sgpa() {
    let s = sheet(json!([
        ["Semester", 1, 1],
        ["Credit", 0, "n/a"],
        ["Code", "HS3152", "GE3171"],
        ["Name", "English", "Lab"],
        ["label", "label", "label"],
        ["Asha", "710022104002", "O", "A+"]
    ]));
    let res = ingest(&s, 1).expect("ingest");
    let sem = &res.records[0].semester;
    assert_eq!(sem.subjects.len(), 2);
    assert_eq!(sem.sgpa, 0.0);
    assert_eq!(sem.total_credits, 0.0);
    assert_eq!(res.cgpa_by_student().get("710022104002"), Some(&0.0));
}

#[test]
fn rows_split_by_semester_and_distribution_counts_students() {
    let s = sheet(json!([
        ["Semester", "Sem 5", null, "S6", "Semester 6"],
        ["Credit", 4, 3, 3, 1],
        ["Subject code", "CS3591", "CS3551", "CCS332", "CCS334"],
        ["Subject name", "Networks", null, "OS", "CN"],
        ["Name", "Register No", "grade", "grade", "grade"],
        ["Asha", "710022104002", "A", "B", "O", "A+"],
        ["Asha (retake)", "710022104002", null, null, "A", null],
        ["Ravi", "2210400123", "C", "U", null, null],
        [null, null, "A", "A", "A", "A"]
    ]));
    let res = ingest(&s, 1).expect("ingest");

    let keys: Vec<(String, u8, usize)> = res
        .records
        .iter()
        .map(|r| (r.register_number.clone(), r.semester.semester, r.semester.subjects.len()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("710022104002".to_string(), 5, 2),
            ("710022104002".to_string(), 6, 2),
            ("710022104002".to_string(), 6, 1),
            ("2210400123".to_string(), 5, 2),
        ]
    );
    assert_eq!(res.records[0].semester.subjects[1].name, "CS3551");

    // Distinct students, not record count.
    assert_eq!(res.semester_distribution.get(&5), Some(&2));
    assert_eq!(res.semester_distribution.get(&6), Some(&1));

    assert_eq!(res.skipped_rows, 1);
    assert_eq!(res.skipped[0].reason, SkipReason::NoRegisterNumber);

    // Sem 5: (8*4 + 6*3) / 7 = 7.142..
    assert_eq!(res.records[0].semester.sgpa, 7.14);
    // Ravi: (5*4 + 0*3) / 7 = 2.857..
    assert_eq!(res.records[3].semester.sgpa, 2.86);

    for r in &res.records {
        let s = r.semester.sgpa;
        assert!((0.0..=10.0).contains(&s));
        assert!(((s * 100.0).round() - s * 100.0).abs() < 1e-9);
    }
}

#[test]
fn unrecognized_grade_tokens_score_zero_and_are_reported() {
    let s = sheet(json!([
        ["Semester", 4, 4],
        ["Credit", 2, 2],
        ["Code", "MA3452", "CS3452"],
        ["Name", "Maths", "TOC"],
        ["label", "label", "label"],
        ["Asha", "710022104002", "E", "O"]
    ]));
    let res = ingest(&s, 1).expect("ingest");
    assert_eq!(res.records[0].semester.subjects[0].grade_point, 0.0);
    assert_eq!(res.records[0].semester.sgpa, 5.0);
    assert_eq!(res.unrecognized_grades.len(), 1);
    assert_eq!(res.unrecognized_grades[0].grade, "E");
    assert_eq!(res.unrecognized_grades[0].subject_code, "MA3452");
}

#[test]
fn short_register_numbers_keep_last_ten_digits() {
    let s = sheet(json!([
        ["Semester", 3],
        ["Credit", 4],
        ["Code", "MA3354"],
        ["Name", "Discrete"],
        ["label", "label"],
        ["Asha", "71002210400", "B+"],
        ["Ravi", 710022104005.0, "A"]
    ]));
    let res = ingest(&s, 1).expect("ingest");
    let regs: Vec<&str> = res
        .records
        .iter()
        .map(|r| r.register_number.as_str())
        .collect();
    assert_eq!(regs, vec!["1002210400", "710022104005"]);
}

fn graded(res: &ingest::IngestResult, record: usize) -> Vec<(String, String)> {
    res.records[record]
        .semester
        .subjects
        .iter()
        .map(|s| (s.code.clone(), s.grade.clone()))
        .collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(c, g)| (c.to_string(), g.to_string()))
        .collect()
}

#[test]
fn grades_stay_under_their_own_subject_column() {
    // Serial number, name and register number before the first subject.
    let three_identity = sheet(json!([
        ["Semester", null, null, 6, 6],
        ["Credit", null, null, 3, 4],
        ["Code", null, null, "CCS332", "CCS336"],
        ["Name", null, null, "OS", "BDA"],
        ["S.No", "Name", "Register No", "grade", "grade"],
        [1, "Asha", "710022104002", "A", "O"]
    ]));
    let res = ingest(&three_identity, 1).expect("ingest");
    assert_eq!(graded(&res, 0), pairs(&[("CCS332", "A"), ("CCS336", "O")]));
    assert_eq!(res.records[0].student_name.as_deref(), Some("Asha"));
    // (8*3 + 10*4) / 7
    assert_eq!(res.records[0].semester.sgpa, 9.14);

    let two_identity = sheet(json!([
        ["Semester", null, 5, 5],
        ["Credit", null, 4, 3],
        ["Code", null, "CS3591", "CS3551"],
        ["Name", null, "Networks", "Distributed"],
        ["label", "label", "label", "label"],
        ["Ravi", "710022104009", "B+", "A+"]
    ]));
    let res = ingest(&two_identity, 1).expect("ingest");
    assert_eq!(graded(&res, 0), pairs(&[("CS3591", "B+"), ("CS3551", "A+")]));
}

#[test]
fn identity_labels_in_code_row_are_not_subjects() {
    let labelled = sheet(json!([
        ["Semester", null, 6, 6],
        ["Credit", null, 3, 4],
        ["Subject code", "Reg No", "CCS332", "CCS336"],
        ["Subject name", null, "OS", "BDA"],
        ["label", "label", "label", "label"],
        ["Asha", "710022104002", "A", "O"]
    ]));
    let res = ingest(&labelled, 1).expect("ingest");
    let codes: Vec<&str> = res.subject_columns.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes, vec!["CCS332", "CCS336"]);
    assert_eq!(graded(&res, 0), pairs(&[("CCS332", "A"), ("CCS336", "O")]));

    // Unknown free text stays a column but does not pull grades away from their subjects.
    let remarks = sheet(json!([
        ["Semester", null, 6, 6],
        ["Credit", null, 3, 4],
        ["Subject code", "Remarks", "CCS332", "CCS336"],
        ["Subject name", null, "OS", "BDA"],
        ["label", "label", "label", "label"],
        ["Asha", "710022104002", "A", "O"]
    ]));
    let res = ingest(&remarks, 1).expect("ingest");
    assert_eq!(graded(&res, 0), pairs(&[("CCS332", "A"), ("CCS336", "O")]));
}

#[test]
fn non_ascii_digit_register_numbers_skip_the_row() {
    let s = sheet(json!([
        ["Semester", 6, 6, 6],
        ["Credit", 3, 2, 4],
        ["Code", "CCS332", "CCS334", "CCS336"],
        ["Name", "OS", "CN", "BDA"],
        ["label", "label", "label", "label"],
        ["Asha", "\u{0660}710022104", "A", "B+", "O"],
        ["Kavya", "７１００２２１０４００２", "O", "A+", "A"],
        ["Ravi", "710022104003", "B", "B", "B"]
    ]));
    let res = ingest(&s, 1).expect("ingest");
    assert_eq!(res.records.len(), 1);
    assert_eq!(res.records[0].register_number, "710022104003");
    assert_eq!(res.skipped_rows, 2);
    assert!(res
        .skipped
        .iter()
        .all(|r| r.reason == SkipReason::NoRegisterNumber));
    assert_eq!(res.skipped[0].row_number, 6);
    assert_eq!(res.skipped[1].row_number, 7);

    let only_unicode = sheet(json!([
        ["Semester", 6],
        ["Credit", 3],
        ["Code", "CCS332"],
        ["Name", "OS"],
        ["label", "label"],
        ["Kavya", "７１００２２１０４００２", "O"]
    ]));
    assert_eq!(ingest(&only_unicode, 1), Err(IngestError::NoValidStudentRows));
}

#[test]
fn csv_fixture_loads_and_ingests() {
    let s = sheet::load_grade_sheet(&fixture_path("sem6_results.csv")).expect("load csv");
    let res = ingest(&s, 1).expect("ingest");
    assert_eq!(res.records.len(), 3);
    assert_eq!(res.semester_distribution.get(&6), Some(&3));
    assert_eq!(res.records[0].register_number, "710022104002");
    assert_eq!(res.records[0].semester.sgpa, 8.67);
    assert_eq!(res.skipped_rows, 1);
}

#[test]
fn xlsx_workbook_loads_and_ingests() {
    use rust_xlsxwriter::Workbook;

    let dir = temp_dir("placementd-xlsx");
    let path = dir.join("results.xlsx");

    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    // Leave the first row empty; it must not shift the header block.
    ws.write_string(1, 0, "Semester").expect("write");
    ws.write_string(2, 0, "Credit").expect("write");
    ws.write_string(3, 0, "Code").expect("write");
    ws.write_string(4, 0, "Name").expect("write");
    ws.write_string(5, 0, "label").expect("write");
    let subjects = [("CCS332", "OS", 3.0, "A"), ("CCS334", "CN", 2.0, "B+"), ("CCS336", "BDA", 4.0, "O")];
    for (i, (code, name, credit, grade)) in subjects.iter().enumerate() {
        let col = (i + 1) as u16;
        ws.write_number(1, col, 6.0).expect("write");
        ws.write_number(2, col, *credit).expect("write");
        ws.write_string(3, col, *code).expect("write");
        ws.write_string(4, col, *name).expect("write");
        ws.write_string(5, col, "grade").expect("write");
        ws.write_string(6, col + 1, *grade).expect("write");
    }
    ws.write_string(6, 0, "Nithishwaran").expect("write");
    ws.write_number(6, 1, 710022104002.0).expect("write");
    workbook.save(&path).expect("save xlsx");

    let s = sheet::load_grade_sheet(&path).expect("load xlsx");
    let res = ingest(&s, 1).expect("ingest");
    assert_eq!(res.records.len(), 1);
    assert_eq!(res.records[0].register_number, "710022104002");
    assert_eq!(res.records[0].semester.semester, 6);
    assert_eq!(res.records[0].semester.sgpa, 8.67);
}
