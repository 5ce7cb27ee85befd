use crate::attendance::AttendanceStatus;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::ScheduleType;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Schedule,
    Attendance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "schedule" => Some(Self::Schedule),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Schedule => "setup.schedule",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Schedule => json!({
            "includeInactiveByDefault": false,
            "defaultScheduleType": "lecture"
        }),
        SetupSection::Attendance => json!({
            "defaultStatus": "present",
            "recomputeEnrollmentStats": true
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Schedule => match k.as_str() {
                "includeInactiveByDefault" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultScheduleType" => {
                    let s = parse_string_max(v, k, 16)?;
                    let t = ScheduleType::parse(&s).ok_or(
                        "defaultScheduleType must be one of: lecture, lab, tutorial, exam, review",
                    )?;
                    obj.insert(k.clone(), Value::String(t.as_str().to_string()));
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "defaultStatus" => {
                    let s = parse_string_max(v, k, 16)?;
                    let status = AttendanceStatus::parse(&s)
                        .ok_or("defaultStatus must be one of: present, absent, late, excused")?;
                    obj.insert(k.clone(), Value::String(status.as_str().to_string()));
                }
                "recomputeEnrollmentStats" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleSetup {
    pub include_inactive_by_default: bool,
    pub default_schedule_type: ScheduleType,
}

#[derive(Debug, Clone, Copy)]
pub struct AttendanceSetup {
    pub default_status: AttendanceStatus,
    pub recompute_enrollment_stats: bool,
}

pub fn load_schedule_setup(conn: &rusqlite::Connection) -> ScheduleSetup {
    let obj = load_section(conn, SetupSection::Schedule)
        .unwrap_or_else(|_| default_section(SetupSection::Schedule));
    ScheduleSetup {
        include_inactive_by_default: obj
            .get("includeInactiveByDefault")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        default_schedule_type: obj
            .get("defaultScheduleType")
            .and_then(|v| v.as_str())
            .and_then(ScheduleType::parse)
            .unwrap_or(ScheduleType::Lecture),
    }
}

pub fn load_attendance_setup(conn: &rusqlite::Connection) -> AttendanceSetup {
    let obj = load_section(conn, SetupSection::Attendance)
        .unwrap_or_else(|_| default_section(SetupSection::Attendance));
    AttendanceSetup {
        default_status: obj
            .get("defaultStatus")
            .and_then(|v| v.as_str())
            .and_then(AttendanceStatus::parse)
            .unwrap_or_default(),
        recompute_enrollment_stats: obj
            .get("recomputeEnrollmentStats")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let schedule = match load_section(conn, SetupSection::Schedule) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let attendance = match load_section(conn, SetupSection::Attendance) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "schedule": schedule,
            "attendance": attendance
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        tracing::error!(error = %e, key = section.key(), "failed to persist setup section");
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(key = section.key(), "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
