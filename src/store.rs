use crate::error::{CoreError, CoreResult};
use crate::schedule::{
    format_date, format_date_list, format_time, parse_date, parse_date_list, parse_time, ClassInfo,
    ScheduleDefinition, ScheduleType,
};
use chrono::Utc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde_json::json;
use std::collections::HashMap;

const SCHEDULE_COLUMNS: &str = "s.id, s.class_id, s.day_of_week, s.start_time, s.end_time,
    s.effective_from, s.effective_to, s.room, s.building, s.campus, s.schedule_type,
    s.is_active, s.is_online, s.online_url, s.lecturer_override, s.cancelled_dates,
    s.deleted_dates";

/// Row as stored, before date/time decoding.
struct StoredSchedule {
    id: String,
    class_id: String,
    day_of_week: Option<i64>,
    start_time: String,
    end_time: String,
    effective_from: Option<String>,
    effective_to: Option<String>,
    room: Option<String>,
    building: Option<String>,
    campus: Option<String>,
    schedule_type: String,
    is_active: bool,
    is_online: bool,
    online_url: Option<String>,
    lecturer_override: Option<String>,
    cancelled_dates: String,
    deleted_dates: String,
}

fn read_stored(r: &Row<'_>) -> rusqlite::Result<StoredSchedule> {
    Ok(StoredSchedule {
        id: r.get(0)?,
        class_id: r.get(1)?,
        day_of_week: r.get(2)?,
        start_time: r.get(3)?,
        end_time: r.get(4)?,
        effective_from: r.get(5)?,
        effective_to: r.get(6)?,
        room: r.get(7)?,
        building: r.get(8)?,
        campus: r.get(9)?,
        schedule_type: r.get(10)?,
        is_active: r.get::<_, i64>(11)? != 0,
        is_online: r.get::<_, i64>(12)? != 0,
        online_url: r.get(13)?,
        lecturer_override: r.get(14)?,
        cancelled_dates: r.get(15)?,
        deleted_dates: r.get(16)?,
    })
}

fn decode(s: StoredSchedule) -> CoreResult<ScheduleDefinition> {
    let schedule_type = ScheduleType::parse(&s.schedule_type).ok_or_else(|| {
        CoreError::validation(format!(
            "schedule {} has unknown type {:?}",
            s.id, s.schedule_type
        ))
    })?;
    let day_of_week = match s.day_of_week {
        Some(d) if (1..=7).contains(&d) => Some(d as u32),
        // Left to the expander, which skips and reports patternless rows.
        Some(d) => {
            tracing::warn!(schedule_id = %s.id, day_of_week = d, "stored dayOfWeek out of range");
            None
        }
        None => None,
    };
    Ok(ScheduleDefinition {
        day_of_week,
        start_time: parse_time(&s.start_time)?,
        end_time: parse_time(&s.end_time)?,
        effective_from: s.effective_from.as_deref().map(parse_date).transpose()?,
        effective_to: s.effective_to.as_deref().map(parse_date).transpose()?,
        room: s.room,
        building: s.building,
        campus: s.campus,
        schedule_type,
        is_active: s.is_active,
        is_online: s.is_online,
        online_url: s.online_url,
        lecturer_override: s.lecturer_override,
        cancelled_dates: parse_date_list(&s.cancelled_dates)?,
        deleted_dates: parse_date_list(&s.deleted_dates)?,
        id: s.id,
        class_id: s.class_id,
    })
}

/// Loads stored definitions, optionally restricted to one class.
pub fn load_definitions(conn: &Connection, class_id: Option<&str>) -> CoreResult<Vec<ScheduleDefinition>> {
    let mut sql = format!(
        "SELECT {} FROM schedules s JOIN classes c ON c.id = s.class_id WHERE 1 = 1",
        SCHEDULE_COLUMNS
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(class_id) = class_id {
        sql.push_str(" AND s.class_id = ?");
        bind.push(Value::Text(class_id.to_string()));
    }
    sql.push_str(" ORDER BY s.class_id, s.day_of_week, s.start_time, s.id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), read_stored)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode).collect()
}

pub fn get_definition(conn: &Connection, schedule_id: &str) -> CoreResult<ScheduleDefinition> {
    let sql = format!("SELECT {} FROM schedules s WHERE s.id = ?", SCHEDULE_COLUMNS);
    let stored = conn
        .query_row(&sql, [schedule_id], read_stored)
        .optional()?
        .ok_or_else(|| CoreError::not_found(format!("schedule {} not found", schedule_id)))?;
    decode(stored)
}

fn opt_date(d: Option<chrono::NaiveDate>) -> Option<String> {
    d.map(format_date)
}

pub fn insert_definition(conn: &Connection, def: &ScheduleDefinition) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO schedules(
            id, class_id, day_of_week, start_time, end_time, effective_from, effective_to,
            room, building, campus, schedule_type, is_active, is_online, online_url,
            lecturer_override, cancelled_dates, deleted_dates, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            def.id,
            def.class_id,
            def.day_of_week.map(i64::from),
            format_time(def.start_time),
            format_time(def.end_time),
            opt_date(def.effective_from),
            opt_date(def.effective_to),
            def.room,
            def.building,
            def.campus,
            def.schedule_type.as_str(),
            def.is_active as i64,
            def.is_online as i64,
            def.online_url,
            def.lecturer_override,
            format_date_list(&def.cancelled_dates),
            format_date_list(&def.deleted_dates),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn update_definition(conn: &Connection, def: &ScheduleDefinition) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE schedules SET
            day_of_week = ?, start_time = ?, end_time = ?, effective_from = ?, effective_to = ?,
            room = ?, building = ?, campus = ?, schedule_type = ?, is_active = ?, is_online = ?,
            online_url = ?, lecturer_override = ?, cancelled_dates = ?, deleted_dates = ?,
            updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            def.day_of_week.map(i64::from),
            format_time(def.start_time),
            format_time(def.end_time),
            opt_date(def.effective_from),
            opt_date(def.effective_to),
            def.room,
            def.building,
            def.campus,
            def.schedule_type.as_str(),
            def.is_active as i64,
            def.is_online as i64,
            def.online_url,
            def.lecturer_override,
            format_date_list(&def.cancelled_dates),
            format_date_list(&def.deleted_dates),
            Utc::now().to_rfc3339(),
            def.id,
        ],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found(format!("schedule {} not found", def.id)));
    }
    Ok(())
}

/// Removes a definition. Attendance keeps its rows with the reference cleared.
pub fn delete_definition(conn: &Connection, schedule_id: &str) -> CoreResult<usize> {
    let detached = conn.execute(
        "UPDATE attendance_records SET schedule_id = NULL WHERE schedule_id = ?",
        [schedule_id],
    )?;
    let removed = conn.execute("DELETE FROM schedules WHERE id = ?", [schedule_id])?;
    if removed == 0 {
        return Err(CoreError::not_found(format!("schedule {} not found", schedule_id)));
    }
    Ok(detached)
}

fn read_class(r: &Row<'_>) -> rusqlite::Result<ClassInfo> {
    Ok(ClassInfo {
        id: r.get(0)?,
        name: r.get(1)?,
        course_code: r.get(2)?,
        default_lecturer_id: r.get(3)?,
        default_room: r.get(4)?,
        default_building: r.get(5)?,
    })
}

pub fn get_class(conn: &Connection, class_id: &str) -> CoreResult<ClassInfo> {
    conn.query_row(
        "SELECT id, name, course_code, default_lecturer_id, default_room, default_building
         FROM classes WHERE id = ?",
        [class_id],
        read_class,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(format!("class {} not found", class_id)))
}

pub fn load_classes(conn: &Connection) -> CoreResult<HashMap<String, ClassInfo>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, course_code, default_lecturer_id, default_room, default_building
         FROM classes",
    )?;
    let classes = stmt
        .query_map([], read_class)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(classes.into_iter().map(|c| (c.id.clone(), c)).collect())
}

pub fn definition_json(def: &ScheduleDefinition) -> serde_json::Value {
    let cancelled: Vec<String> = def.cancelled_dates.iter().copied().map(format_date).collect();
    let deleted: Vec<String> = def.deleted_dates.iter().copied().map(format_date).collect();
    json!({
        "id": def.id,
        "classId": def.class_id,
        "dayOfWeek": def.day_of_week,
        "startTime": format_time(def.start_time),
        "endTime": format_time(def.end_time),
        "effectiveFrom": opt_date(def.effective_from),
        "effectiveTo": opt_date(def.effective_to),
        "room": def.room,
        "building": def.building,
        "campus": def.campus,
        "scheduleType": def.schedule_type.as_str(),
        "isActive": def.is_active,
        "isOnline": def.is_online,
        "onlineUrl": def.online_url,
        "lecturerOverride": def.lecturer_override,
        "isSingleDay": def.is_single_day(),
        "cancelledDates": cancelled,
        "deletedDates": deleted
    })
}
