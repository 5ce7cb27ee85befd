use crate::attendance::{
    self, AttendanceEntry, AttendanceIdentifier, AttendanceKey, AttendancePatch, AttendanceStatus,
    BulkOptions, RecordFilter,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::load_attendance_setup;
use crate::ipc::helpers::{
    nullable_str, nullable_time, optional_bool, optional_date, optional_i64, optional_id,
    optional_str, optional_time, required_date, required_id, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_status(params: &Value, key: &str) -> Result<Option<AttendanceStatus>, HandlerErr> {
    match optional_str(params, key)? {
        Some(raw) => AttendanceStatus::parse(&raw).map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "{} must be one of: present, absent, late, excused (got {:?})",
                key, raw
            ))
        }),
        None => Ok(None),
    }
}

fn parse_entries(params: &Value) -> Result<Vec<AttendanceEntry>, HandlerErr> {
    let records = match params.get("records") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(HandlerErr::bad_params("records must be an array")),
    };
    let mut out = Vec::with_capacity(records.len());
    for (i, item) in records.iter().enumerate() {
        if !item.is_object() {
            return Err(HandlerErr::bad_params(format!("records[{}] must be an object", i)));
        }
        let entry = AttendanceEntry {
            student_id: required_id(item, "studentId")?,
            status: parse_status(item, "status")?,
            check_in_time: optional_time(item, "checkInTime")?,
            notes: optional_str(item, "notes")?,
        };
        out.push(entry);
    }
    Ok(out)
}

fn positive_session(params: &Value) -> Result<Option<i64>, HandlerErr> {
    match optional_i64(params, "sessionNumber")? {
        Some(n) if n < 1 => Err(HandlerErr::bad_params("sessionNumber must be >= 1")),
        other => Ok(other),
    }
}

fn attendance_bulk_mark(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_id(params, "classId")?;
    let entries = parse_entries(params)?;
    let setup = load_attendance_setup(conn);
    let options = BulkOptions {
        recorded_by: optional_id(params, "recordedBy")?,
        schedule_id: optional_id(params, "scheduleId")?,
        attendance_date: optional_date(params, "attendanceDate")?,
        session_number: positive_session(params)?,
        create_for_all: optional_bool(params, "createForAll")?.unwrap_or(false),
        default_status: setup.default_status,
        recompute_enrollment_stats: setup.recompute_enrollment_stats,
    };
    let outcome = attendance::mark_attendance_bulk(conn, &class_id, &entries, &options)?;
    Ok(json!(outcome))
}

fn parse_identifier(params: &Value) -> Result<AttendanceIdentifier, HandlerErr> {
    if let Some(id) = optional_id(params, "attendanceId")? {
        return Ok(AttendanceIdentifier::Id(id));
    }
    let Some(key) = params.get("key").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("pass attendanceId or key"));
    };
    let session_number = optional_i64(key, "sessionNumber")?
        .ok_or_else(|| HandlerErr::bad_params("missing key.sessionNumber"))?;
    if session_number < 1 {
        return Err(HandlerErr::bad_params("key.sessionNumber must be >= 1"));
    }
    Ok(AttendanceIdentifier::Key(AttendanceKey {
        class_id: required_id(key, "classId")?,
        student_id: required_id(key, "studentId")?,
        schedule_id: optional_id(key, "scheduleId")?,
        attendance_date: required_date(key, "attendanceDate")?,
        session_number,
    }))
}

fn parse_attendance_patch(params: &Value) -> Result<AttendancePatch, HandlerErr> {
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    Ok(AttendancePatch {
        status: parse_status(patch, "status")?,
        notes: nullable_str(patch, "notes")?,
        check_in_time: nullable_time(patch, "checkInTime")?,
        recorded_by: optional_id(patch, "recordedBy")?,
    })
}

fn attendance_patch(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let identifier = parse_identifier(params)?;
    let patch = parse_attendance_patch(params)?;
    let setup = load_attendance_setup(conn);
    let defaults = BulkOptions {
        default_status: setup.default_status,
        recompute_enrollment_stats: setup.recompute_enrollment_stats,
        ..BulkOptions::default()
    };
    let record = attendance::update_attendance_record(conn, &identifier, &patch, &defaults)?;
    Ok(json!({ "record": record }))
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_id(params, "classId")?;
    store::get_class(conn, &class_id)?;
    let filter = RecordFilter {
        session_number: positive_session(params)?,
        schedule_id: optional_id(params, "scheduleId")?,
        attendance_date: optional_date(params, "attendanceDate")?,
    };
    let records = attendance::list_records(conn, &class_id, &filter)?;
    Ok(json!({ "records": records }))
}

fn attendance_occurrence_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_id(params, "scheduleId")?;
    let date = required_date(params, "date")?;
    let session = attendance::open_occurrence(conn, &schedule_id, date)?;
    Ok(json!(session))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.bulkMark" => Some(with_conn(state, req, attendance_bulk_mark)),
        "attendance.patch" => Some(with_conn(state, req, attendance_patch)),
        "attendance.list" => Some(with_conn(state, req, attendance_list)),
        "attendance.occurrenceOpen" => Some(with_conn(state, req, attendance_occurrence_open)),
        _ => None,
    }
}
