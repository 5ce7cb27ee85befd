use crate::conflicts::{detect_by_date, ConflictScope};
use crate::exceptions::{self, DeleteOutcome, EditOutcome, SchedulePatch};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::load_schedule_setup;
use crate::ipc::helpers::{
    nullable_date, nullable_id, nullable_str, optional_bool, optional_date, optional_i64,
    optional_id, optional_str, optional_time, required_date, required_id, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, format_date, Occurrence, ScheduleType};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

const PATCH_FIELDS: &[&str] = &[
    "dayOfWeek",
    "effectiveFrom",
    "effectiveTo",
    "startTime",
    "endTime",
    "room",
    "building",
    "campus",
    "scheduleType",
    "isActive",
    "isOnline",
    "onlineUrl",
    "lecturerOverride",
];

fn parse_month_year(params: &Value) -> Result<(i32, u32), HandlerErr> {
    let month = optional_i64(params, "month")?
        .ok_or_else(|| HandlerErr::bad_params("missing month"))?;
    let year = optional_i64(params, "year")?
        .ok_or_else(|| HandlerErr::bad_params("missing year"))?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::bad_params("month must be between 1 and 12"));
    }
    let year = i32::try_from(year).map_err(|_| HandlerErr::bad_params("year out of range"))?;
    Ok((year, month as u32))
}

fn parse_patch(params: &Value) -> Result<SchedulePatch, HandlerErr> {
    let Some(obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    if let Some(unknown) = obj.keys().find(|k| !PATCH_FIELDS.contains(&k.as_str())) {
        return Err(HandlerErr::bad_params(format!("unknown patch field: {}", unknown)));
    }
    let patch = Value::Object(obj.clone());

    let day_of_week = match patch.get("dayOfWeek") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(v) => match v.as_i64() {
            Some(d) if (1..=7).contains(&d) => Some(Some(d as u32)),
            _ => return Err(HandlerErr::bad_params("dayOfWeek must be in 1..=7 or null")),
        },
    };
    let schedule_type = match optional_str(&patch, "scheduleType")? {
        Some(raw) => Some(ScheduleType::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("scheduleType must be one of: lecture, lab, tutorial, exam, review")
        })?),
        None => None,
    };

    Ok(SchedulePatch {
        day_of_week,
        effective_from: nullable_date(&patch, "effectiveFrom")?,
        effective_to: nullable_date(&patch, "effectiveTo")?,
        start_time: optional_time(&patch, "startTime")?,
        end_time: optional_time(&patch, "endTime")?,
        room: nullable_str(&patch, "room")?,
        building: nullable_str(&patch, "building")?,
        campus: nullable_str(&patch, "campus")?,
        schedule_type,
        is_active: optional_bool(&patch, "isActive")?,
        is_online: optional_bool(&patch, "isOnline")?,
        online_url: nullable_str(&patch, "onlineUrl")?,
        lecturer_override: nullable_id(&patch, "lecturerOverride")?,
    })
}

fn occurrences_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (year, month) = parse_month_year(params)?;
    let class_id = optional_id(params, "classId")?;
    let course_code = optional_str(params, "courseCode")?.map(|c| c.to_lowercase());
    let lecturer_id = optional_id(params, "lecturerId")?;
    let include_inactive = match optional_bool(params, "includeInactive")? {
        Some(v) => v,
        None => load_schedule_setup(conn).include_inactive_by_default,
    };

    let (start, end) = schedule::month_range(year, month)?;
    let definitions = store::load_definitions(conn, None)?;
    let classes = store::load_classes(conn)?;
    let expansion = schedule::expand(&definitions, &classes, start, end)?;

    // Conflicts are judged against the whole timetable, then narrowed to the view.
    let (pool, scope): (Vec<Occurrence>, ConflictScope) = match &lecturer_id {
        Some(lecturer) => (
            expansion
                .occurrences
                .into_iter()
                .filter(|o| o.lecturer_id.as_deref() == Some(lecturer.as_str()))
                .collect(),
            ConflictScope::OwnOccurrences,
        ),
        None => (expansion.occurrences, ConflictScope::CrossPerson),
    };
    let mut occurrences = detect_by_date(pool, scope);
    occurrences.retain(|o| {
        (include_inactive || o.is_active)
            && class_id.as_deref().map_or(true, |c| o.class_id == c)
            && course_code.as_deref().map_or(true, |c| {
                o.course_code.as_deref().map(|x| x.trim().to_lowercase()).as_deref() == Some(c)
            })
    });
    let conflict_count = occurrences.iter().filter(|o| o.is_conflict).count();

    tracing::debug!(
        year,
        month,
        returned = occurrences.len(),
        conflicts = conflict_count,
        warnings = expansion.warnings.len(),
        "occurrences listed"
    );
    Ok(json!({
        "year": year,
        "month": month,
        "occurrences": occurrences,
        "conflictCount": conflict_count,
        "warnings": expansion.warnings
    }))
}

fn occurrences_toggle(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_id(params, "scheduleId")?;
    let date = optional_date(params, "date")?;
    let cancelled_date = optional_date(params, "cancelledDate")?;
    let is_active = optional_bool(params, "isActive")?;

    let tx = conn.unchecked_transaction()?;
    let mut def = store::get_definition(&tx, &schedule_id)?;
    let (date, state) = match (date, cancelled_date, is_active) {
        (Some(date), None, Some(active)) => {
            (Some(date), exceptions::set_occurrence_active(&mut def, date, active)?)
        }
        // Flips whatever the date currently resolves to.
        (None, Some(date), None) => {
            let active = !def.effective_active(date);
            (Some(date), exceptions::set_occurrence_active(&mut def, date, active)?)
        }
        (None, None, Some(active)) => (None, exceptions::set_series_active(&mut def, active)),
        _ => {
            return Err(HandlerErr::bad_params(
                "pass isActive, date with isActive, or cancelledDate alone",
            ))
        }
    };
    store::update_definition(&tx, &def)?;
    tx.commit()?;

    tracing::info!(
        schedule_id = %schedule_id,
        date = ?date,
        state = state.as_str(),
        "occurrence state changed"
    );
    Ok(json!({
        "scheduleId": schedule_id,
        "date": date.map(format_date),
        "state": state.as_str(),
        "schedule": store::definition_json(&def)
    }))
}

fn occurrences_edit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_id(params, "scheduleId")?;
    let date = optional_date(params, "date")?;
    let patch = parse_patch(params)?;

    let tx = conn.unchecked_transaction()?;
    let mut def = store::get_definition(&tx, &schedule_id)?;
    let split = match date {
        Some(date) => {
            match exceptions::edit_occurrence(&mut def, date, &patch, Uuid::new_v4().to_string())? {
                EditOutcome::UpdatedInPlace => None,
                EditOutcome::Split(child) => Some(child),
            }
        }
        None => {
            exceptions::edit_series(&mut def, &patch)?;
            None
        }
    };
    store::update_definition(&tx, &def)?;
    if let Some(child) = &split {
        store::insert_definition(&tx, child)?;
    }
    tx.commit()?;

    tracing::info!(
        schedule_id = %schedule_id,
        date = ?date,
        split_schedule_id = ?split.as_ref().map(|c| c.id.as_str()),
        "schedule edited"
    );
    Ok(json!({
        "scheduleId": schedule_id,
        "schedule": store::definition_json(&def),
        "splitScheduleId": split.as_ref().map(|c| c.id.clone()),
        "splitSchedule": split.as_ref().map(store::definition_json)
    }))
}

fn occurrences_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_id(params, "scheduleId")?;
    let date = optional_date(params, "date")?;

    let tx = conn.unchecked_transaction()?;
    let mut def = store::get_definition(&tx, &schedule_id)?;
    let (removed, detached) = match exceptions::delete_occurrence(&mut def, date)? {
        DeleteOutcome::DateRemoved => {
            store::update_definition(&tx, &def)?;
            ("date", 0)
        }
        DeleteOutcome::DefinitionRemoved => ("definition", store::delete_definition(&tx, &schedule_id)?),
    };
    tx.commit()?;

    tracing::info!(
        schedule_id = %schedule_id,
        date = ?date,
        removed,
        detached_attendance = detached,
        "occurrence deleted"
    );
    Ok(json!({
        "scheduleId": schedule_id,
        "removed": removed,
        "detachedAttendance": detached
    }))
}

fn occurrence_state(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_id(params, "scheduleId")?;
    let date = required_date(params, "date")?;
    let def = store::get_definition(conn, &schedule_id)?;
    if !def.matches_date(date) {
        return Err(HandlerErr::bad_params(format!(
            "{} is not an occurrence of schedule {}",
            format_date(date),
            schedule_id
        )));
    }
    let state = exceptions::state_of(&def, date);
    Ok(json!({
        "scheduleId": schedule_id,
        "date": format_date(date),
        "state": state.as_str(),
        "isActive": !def.is_deleted_on(date) && def.effective_active(date)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "occurrences.list" => Some(with_conn(state, req, occurrences_list)),
        "occurrences.state" => Some(with_conn(state, req, occurrence_state)),
        "occurrences.toggle" => Some(with_conn(state, req, occurrences_toggle)),
        "occurrences.edit" => Some(with_conn(state, req, occurrences_edit)),
        "occurrences.delete" => Some(with_conn(state, req, occurrences_delete)),
        _ => None,
    }
}
