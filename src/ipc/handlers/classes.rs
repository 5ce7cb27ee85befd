use crate::enrollment::{self, EnrollmentStatus};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_id, optional_str, required_id, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.course_code,
           c.default_lecturer_id,
           c.default_room,
           c.default_building,
           (SELECT COUNT(*) FROM schedules s WHERE s.class_id = c.id) AS schedule_count,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS enrollment_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let course_code: Option<String> = row.get(2)?;
            let default_lecturer_id: Option<String> = row.get(3)?;
            let default_room: Option<String> = row.get(4)?;
            let default_building: Option<String> = row.get(5)?;
            let schedule_count: i64 = row.get(6)?;
            let enrollment_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "courseCode": course_code,
                "defaultLecturerId": default_lecturer_id,
                "defaultRoom": default_room,
                "defaultBuilding": default_building,
                "scheduleCount": schedule_count,
                "enrollmentCount": enrollment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let course_code = optional_str(params, "courseCode")?;
    let default_lecturer_id = optional_id(params, "defaultLecturerId")?;
    let default_room = optional_str(params, "defaultRoom")?;
    let default_building = optional_str(params, "defaultBuilding")?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, course_code, default_lecturer_id, default_room, default_building)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &class_id,
            &name,
            &course_code,
            &default_lecturer_id,
            &default_room,
            &default_building,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;
    Ok(json!({ "classId": class_id, "name": name }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match required_id(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order; the schema declares no ON DELETE CASCADE.
    for table in ["attendance_records", "schedules", "enrollments"] {
        let sql = format!("DELETE FROM {} WHERE class_id = ?", table);
        if let Err(e) = tx.execute(&sql, [&class_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(class_id = %class_id, "class deleted");
    ok(&req.id, json!({ "ok": true }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let student_no = optional_str(params, "studentNo")?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, student_no) VALUES(?, ?, ?, ?)",
        (&student_id, &last_name, &first_name, &student_no),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    Ok(json!({ "studentId": student_id }))
}

fn enrollments_set(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_id(params, "classId")?;
    let student_id = required_id(params, "studentId")?;
    let status_raw = required_str(params, "status")?;
    let status = EnrollmentStatus::parse(&status_raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be one of: enrolled, completed, dropped, withdrawn, pending")
    })?;
    store::get_class(conn, &class_id)?;
    let enrollment_id = enrollment::set_enrollment(conn, &class_id, &student_id, status)?;
    tracing::info!(class_id = %class_id, student_id = %student_id, status = status.as_str(), "enrollment set");
    Ok(json!({
        "enrollmentId": enrollment_id,
        "status": status.as_str(),
        "attendanceEligible": status.is_attendance_eligible()
    }))
}

fn enrollments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_id(params, "classId")?;
    store::get_class(conn, &class_id)?;
    let rows = enrollment::list_enrollments(conn, &class_id)?;
    Ok(json!({ "enrollments": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(with_conn(state, req, classes_create)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "enrollments.set" => Some(with_conn(state, req, enrollments_set)),
        "enrollments.list" => Some(with_conn(state, req, enrollments_list)),
        _ => None,
    }
}
