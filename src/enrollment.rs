use crate::error::{CoreError, CoreResult};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Enrolled,
    Completed,
    Dropped,
    Withdrawn,
    Pending,
}

impl EnrollmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enrolled" => Some(Self::Enrolled),
            "completed" => Some(Self::Completed),
            "dropped" => Some(Self::Dropped),
            "withdrawn" => Some(Self::Withdrawn),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enrolled => "enrolled",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
            Self::Withdrawn => "withdrawn",
            Self::Pending => "pending",
        }
    }

    /// Only enrolled and completed students receive attendance rows.
    pub fn is_attendance_eligible(self) -> bool {
        matches!(self, Self::Enrolled | Self::Completed)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub student_id: String,
    pub display_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRow {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub display_name: String,
    pub status: String,
    pub total_sessions: i64,
    pub attended_sessions: i64,
    pub attendance_rate: f64,
}

pub fn eligible_roster(conn: &Connection, class_id: &str) -> CoreResult<Vec<RosterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT e.student_id, s.last_name, s.first_name, e.status
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ? AND e.status IN ('enrolled', 'completed')
         ORDER BY s.last_name, s.first_name, s.id",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(RosterEntry {
                student_id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
                status: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn eligible_student_ids(conn: &Connection, class_id: &str) -> CoreResult<Vec<String>> {
    Ok(eligible_roster(conn, class_id)?
        .into_iter()
        .map(|r| r.student_id)
        .collect())
}

pub fn set_enrollment(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    status: EnrollmentStatus,
) -> CoreResult<String> {
    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !student_exists {
        return Err(CoreError::not_found(format!("student {} not found", student_id)));
    }
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM enrollments WHERE class_id = ? AND student_id = ?",
            (class_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    let now = Utc::now().to_rfc3339();
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE enrollments SET status = ?, updated_at = ? WHERE id = ?",
                (status.as_str(), &now, &id),
            )?;
            Ok(id)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO enrollments(id, class_id, student_id, status, updated_at)
                 VALUES(?, ?, ?, ?, ?)",
                (&id, class_id, student_id, status.as_str(), &now),
            )?;
            Ok(id)
        }
    }
}

pub fn list_enrollments(conn: &Connection, class_id: &str) -> CoreResult<Vec<EnrollmentRow>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.class_id, e.student_id, s.last_name, s.first_name, e.status,
                e.total_sessions, e.attended_sessions, e.attendance_rate
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ?
         ORDER BY s.last_name, s.first_name, s.id",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            let last: String = r.get(3)?;
            let first: String = r.get(4)?;
            Ok(EnrollmentRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                student_id: r.get(2)?,
                display_name: format!("{}, {}", last, first),
                status: r.get(5)?,
                total_sessions: r.get(6)?,
                attended_sessions: r.get(7)?,
                attendance_rate: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Refreshes the attendance counters held on enrollment rows.
pub fn recompute_stats(conn: &Connection, class_id: &str, student_ids: &[String]) -> CoreResult<()> {
    let mut count_stmt = conn.prepare(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status IN ('present', 'late') THEN 1 ELSE 0 END), 0)
         FROM attendance_records
         WHERE class_id = ? AND student_id = ?",
    )?;
    for student_id in student_ids {
        let (total, attended): (i64, i64) =
            count_stmt.query_row((class_id, student_id), |r| Ok((r.get(0)?, r.get(1)?)))?;
        let rate = if total > 0 {
            round_2(attended as f64 * 100.0 / total as f64)
        } else {
            0.0
        };
        conn.execute(
            "UPDATE enrollments
             SET total_sessions = ?, attended_sessions = ?, attendance_rate = ?, updated_at = ?
             WHERE class_id = ? AND student_id = ?",
            (
                total,
                attended,
                rate,
                Utc::now().to_rfc3339(),
                class_id,
                student_id,
            ),
        )?;
    }
    Ok(())
}
