use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref GRADE_TOKEN_REGEX: Regex = Regex::new(r"^[A-Z][+-]?$").unwrap();
}

/// Union of the bulk-upload and manual-entry scales. Anything else scores 0.
const GRADE_POINTS: &[(&str, f64)] = &[
    ("O", 10.0),
    ("A+", 9.0),
    ("A", 8.0),
    ("B+", 7.0),
    ("B", 6.0),
    ("C", 5.0),
    ("D", 4.0),
    ("F", 0.0),
    ("U", 0.0),
    ("RA", 0.0),
    ("AB", 0.0),
    ("I", 0.0),
];

/// Grades accepted when a semester is typed in by hand.
pub const MANUAL_SCALE: &[&str] = &["O", "A+", "A", "B+", "B", "C", "RA"];

pub const MIN_SEMESTER: u8 = 1;
pub const MAX_SEMESTER: u8 = 8;

pub fn is_grade_token(s: &str) -> bool {
    GRADE_TOKEN_REGEX.is_match(s)
}

pub fn is_known_grade(grade: &str) -> bool {
    GRADE_POINTS.iter().any(|(g, _)| *g == grade)
}

pub fn grade_point(grade: &str) -> f64 {
    GRADE_POINTS
        .iter()
        .find(|(g, _)| *g == grade)
        .map(|(_, p)| *p)
        .unwrap_or(0.0)
}

pub fn is_manual_grade(grade: &str) -> bool {
    MANUAL_SCALE.contains(&grade)
}

pub fn is_valid_semester(n: i64) -> bool {
    (MIN_SEMESTER as i64..=MAX_SEMESTER as i64).contains(&n)
}

pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub code: String,
    pub name: String,
    pub credit: f64,
    pub grade: String,
    pub grade_point: f64,
}

impl SubjectRecord {
    pub fn new(code: &str, name: &str, credit: f64, grade: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            credit,
            grade: grade.to_string(),
            grade_point: grade_point(grade),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterRecord {
    pub semester: u8,
    pub subjects: Vec<SubjectRecord>,
    pub sgpa: f64,
    pub total_credits: f64,
}

impl SemesterRecord {
    pub fn from_subjects(semester: u8, subjects: Vec<SubjectRecord>) -> Self {
        let (sgpa, total_credits) = sgpa(&subjects);
        Self {
            semester,
            subjects,
            sgpa,
            total_credits,
        }
    }
}

/// Credit-weighted mean grade point over subjects with credit > 0, rounded to 2 decimals.
/// Returns `(sgpa, total_credits)`; a zero-credit semester scores 0.
pub fn sgpa(subjects: &[SubjectRecord]) -> (f64, f64) {
    let mut weighted = 0.0;
    let mut credits = 0.0;
    for s in subjects.iter().filter(|s| s.credit > 0.0) {
        weighted += s.grade_point * s.credit;
        credits += s.credit;
    }
    if credits <= 0.0 {
        return (0.0, credits.max(0.0));
    }
    (round_2_decimals(weighted / credits).clamp(0.0, 10.0), credits)
}

/// Credit-weighted mean of `(sgpa, total_credits)` pairs, ignoring zero-credit semesters.
pub fn cgpa<I>(semesters: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut weighted = 0.0;
    let mut credits = 0.0;
    for (sgpa, total) in semesters {
        if total > 0.0 {
            weighted += sgpa * total;
            credits += total;
        }
    }
    if credits <= 0.0 {
        return 0.0;
    }
    round_2_decimals(weighted / credits).clamp(0.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_token_pattern() {
        for ok in ["O", "A", "A+", "B+", "U", "E", "A-"] {
            assert!(is_grade_token(ok), "{}", ok);
        }
        for bad in ["95%", "Pass", "a+", "RA", "AB", "", "A++"] {
            assert!(!is_grade_token(bad), "{}", bad);
        }
    }

    #[test]
    fn lookup_covers_both_scales() {
        assert_eq!(grade_point("O"), 10.0);
        assert_eq!(grade_point("A+"), 9.0);
        assert_eq!(grade_point("B+"), 7.0);
        assert_eq!(grade_point("D"), 4.0);
        assert_eq!(grade_point("RA"), 0.0);
        assert_eq!(grade_point("E"), 0.0);
        assert!(is_known_grade("AB"));
        assert!(!is_known_grade("E"));
        assert!(is_manual_grade("RA"));
        assert!(!is_manual_grade("D"));
    }

    #[test]
    fn sgpa_matches_worked_example() {
        let subjects = vec![
            SubjectRecord::new("CCS332", "OS", 3.0, "A"),
            SubjectRecord::new("CCS334", "CN", 2.0, "B+"),
            SubjectRecord::new("CCS336", "BDA", 4.0, "O"),
        ];
        // (8*3 + 7*2 + 10*4) / 9 = 78 / 9
        let (sgpa, total) = sgpa(&subjects);
        assert_eq!(sgpa, 8.67);
        assert_eq!(total, 9.0);
    }

    #[test]
    fn zero_credit_semester_scores_zero() {
        let subjects = vec![
            SubjectRecord::new("X1", "X1", 0.0, "O"),
            SubjectRecord::new("X2", "X2", 0.0, "A"),
        ];
        assert_eq!(sgpa(&subjects), (0.0, 0.0));
        assert_eq!(cgpa(Vec::new()), 0.0);
        assert_eq!(cgpa(vec![(9.0, 0.0)]), 0.0);
    }

    #[test]
    fn cgpa_of_equal_semesters_is_that_sgpa() {
        assert_eq!(cgpa(vec![(7.25, 20.0), (7.25, 20.0), (7.25, 20.0)]), 7.25);
        assert_eq!(cgpa(vec![(8.0, 10.0), (6.0, 30.0)]), 6.5);
    }
}
