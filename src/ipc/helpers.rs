use crate::grades;
use crate::ipc::error::err;
use serde_json::Value;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(non_empty_trimmed(s)),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "{} must be string or null",
            key
        ))),
    }
}

pub fn non_empty_trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Register numbers are 10 to 12 digits.
pub fn is_register_number(s: &str) -> bool {
    (10..=12).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

pub fn get_register_number(params: &Value) -> Result<String, HandlerErr> {
    let reg = get_required_str(params, "registerNumber")?;
    if !is_register_number(&reg) {
        return Err(HandlerErr::bad_params(
            "registerNumber must be 10 to 12 digits",
        ));
    }
    Ok(reg)
}

pub fn get_semester(params: &Value, key: &str) -> Result<Option<u8>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key)))?;
            if !grades::is_valid_semester(n) {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be in {}..={}",
                    key,
                    grades::MIN_SEMESTER,
                    grades::MAX_SEMESTER
                )));
            }
            Ok(Some(n as u8))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilters {
    pub department: Option<String>,
    pub batch: Option<String>,
    pub placement_status: Option<String>,
    pub min_cgpa: Option<f64>,
}

impl StudentFilters {
    pub fn matches_profile(
        &self,
        department: Option<&str>,
        batch: Option<&str>,
        placement_status: Option<&str>,
    ) -> bool {
        fn same(want: &Option<String>, have: Option<&str>) -> bool {
            match want {
                None => true,
                Some(w) => have.map(|h| h.eq_ignore_ascii_case(w)).unwrap_or(false),
            }
        }
        same(&self.department, department)
            && same(&self.batch, batch)
            && same(&self.placement_status, placement_status)
    }

    pub fn matches_cgpa(&self, cgpa: f64) -> bool {
        self.min_cgpa.map(|m| cgpa >= m).unwrap_or(true)
    }
}

pub fn parse_student_filters(raw: Option<&Value>) -> Result<StudentFilters, HandlerErr> {
    let Some(raw) = raw else {
        return Ok(StudentFilters::default());
    };
    if raw.is_null() {
        return Ok(StudentFilters::default());
    }
    let Some(_) = raw.as_object() else {
        return Err(HandlerErr::bad_params("filters must be an object"));
    };
    let min_cgpa = match raw.get("minCgpa") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let n = v
                .as_f64()
                .ok_or_else(|| HandlerErr::bad_params("filters.minCgpa must be a number"))?;
            if !(0.0..=10.0).contains(&n) {
                return Err(HandlerErr::bad_params("filters.minCgpa must be in 0..=10"));
            }
            Some(n)
        }
    };
    Ok(StudentFilters {
        department: get_optional_str(raw, "department")?,
        batch: get_optional_str(raw, "batch")?,
        placement_status: get_optional_str(raw, "placementStatus")?,
        min_cgpa,
    })
}
