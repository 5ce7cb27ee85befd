use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::load_schedule_setup;
use crate::ipc::helpers::{
    optional_bool, optional_date, optional_day_of_week, optional_id, optional_str, required_id,
    required_str, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{parse_time, ScheduleDefinition, ScheduleType};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

fn parse_schedule_type(params: &Value, fallback: ScheduleType) -> Result<ScheduleType, HandlerErr> {
    match optional_str(params, "scheduleType")? {
        Some(raw) => ScheduleType::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("scheduleType must be one of: lecture, lab, tutorial, exam, review")
        }),
        None => Ok(fallback),
    }
}

fn schedules_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_id(params, "classId")?;
    store::get_class(conn, &class_id)?;
    let setup = load_schedule_setup(conn);

    // `date` is shorthand for a one-day definition.
    let (day_of_week, effective_from, effective_to) = match optional_date(params, "date")? {
        Some(date) => {
            if params.get("dayOfWeek").is_some_and(|v| !v.is_null()) {
                return Err(HandlerErr::bad_params("date and dayOfWeek are mutually exclusive"));
            }
            (None, Some(date), Some(date))
        }
        None => {
            let day_of_week = optional_day_of_week(params, "dayOfWeek")?;
            let effective_from = optional_date(params, "effectiveFrom")?;
            if day_of_week.is_some() && effective_from.is_none() {
                return Err(HandlerErr::bad_params("a recurring schedule needs effectiveFrom"));
            }
            (day_of_week, effective_from, optional_date(params, "effectiveTo")?)
        }
    };

    let def = ScheduleDefinition {
        id: Uuid::new_v4().to_string(),
        class_id,
        day_of_week,
        start_time: parse_time(&required_str(params, "startTime")?)?,
        end_time: parse_time(&required_str(params, "endTime")?)?,
        effective_from,
        effective_to,
        room: optional_str(params, "room")?,
        building: optional_str(params, "building")?,
        campus: optional_str(params, "campus")?,
        schedule_type: parse_schedule_type(params, setup.default_schedule_type)?,
        is_active: optional_bool(params, "isActive")?.unwrap_or(true),
        is_online: optional_bool(params, "isOnline")?.unwrap_or(false),
        online_url: optional_str(params, "onlineUrl")?,
        lecturer_override: optional_id(params, "lecturerOverride")?,
        cancelled_dates: BTreeSet::new(),
        deleted_dates: BTreeSet::new(),
    };
    def.validate()?;
    store::insert_definition(conn, &def)?;
    tracing::info!(schedule_id = %def.id, class_id = %def.class_id, "schedule created");
    Ok(json!({ "scheduleId": def.id, "schedule": store::definition_json(&def) }))
}

fn schedules_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_id(params, "scheduleId")?;
    let def = store::get_definition(conn, &schedule_id)?;
    Ok(json!({ "schedule": store::definition_json(&def) }))
}

fn schedules_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = optional_id(params, "classId")?;
    let defs = store::load_definitions(conn, class_id.as_deref())?;
    let schedules: Vec<Value> = defs.iter().map(store::definition_json).collect();
    Ok(json!({ "schedules": schedules }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.create" => Some(with_conn(state, req, schedules_create)),
        "schedules.get" => Some(with_conn(state, req, schedules_get)),
        "schedules.list" => Some(with_conn(state, req, schedules_list)),
        _ => None,
    }
}
