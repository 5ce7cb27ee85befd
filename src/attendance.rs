use crate::enrollment::{self, RosterEntry};
use crate::error::{CoreError, CoreResult};
use crate::schedule::{format_date, format_time, parse_date, parse_time};
use crate::store;
use chrono::{Local, NaiveDate, NaiveTime, Utc};
use rusqlite::{
    params_from_iter, types::Value, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "excused" => Some(Self::Excused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }
}

/// One caller-supplied line of a bulk submission.
#[derive(Debug, Clone, Default)]
pub struct AttendanceEntry {
    pub student_id: String,
    pub status: Option<AttendanceStatus>,
    pub check_in_time: Option<NaiveTime>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub recorded_by: Option<String>,
    pub schedule_id: Option<String>,
    pub attendance_date: Option<NaiveDate>,
    pub session_number: Option<i64>,
    /// Enumerate every eligible student instead of only the listed ones.
    pub create_for_all: bool,
    pub default_status: AttendanceStatus,
    pub recompute_enrollment_stats: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            recorded_by: None,
            schedule_id: None,
            attendance_date: None,
            session_number: None,
            create_for_all: false,
            default_status: AttendanceStatus::Present,
            recompute_enrollment_stats: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub schedule_id: Option<String>,
    pub attendance_date: NaiveDate,
    pub session_number: i64,
    pub status: AttendanceStatus,
    pub check_in_time: Option<NaiveTime>,
    pub recorded_by: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub session_number: i64,
    pub records: Vec<AttendanceRecord>,
    /// Listed students who are not eligible and received no row.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceKey {
    pub class_id: String,
    pub student_id: String,
    pub schedule_id: Option<String>,
    pub attendance_date: NaiveDate,
    pub session_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceIdentifier {
    Id(String),
    Key(AttendanceKey),
}

#[derive(Debug, Clone, Default)]
pub struct AttendancePatch {
    pub status: Option<AttendanceStatus>,
    pub notes: Option<Option<String>>,
    pub check_in_time: Option<Option<NaiveTime>>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub session_number: Option<i64>,
    pub schedule_id: Option<String>,
    pub attendance_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceSession {
    pub schedule_id: String,
    pub class_id: String,
    pub date: NaiveDate,
    pub session_number: Option<i64>,
    pub records: Vec<AttendanceRecord>,
    pub roster: Vec<RosterEntry>,
}

const RECORD_COLUMNS: &str = "id, class_id, student_id, schedule_id, attendance_date,
    session_number, status, check_in_time, recorded_by, notes, created_at, updated_at";

struct StoredRecord {
    id: String,
    class_id: String,
    student_id: String,
    schedule_id: Option<String>,
    attendance_date: String,
    session_number: i64,
    status: String,
    check_in_time: Option<String>,
    recorded_by: String,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_stored(r: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        id: r.get(0)?,
        class_id: r.get(1)?,
        student_id: r.get(2)?,
        schedule_id: r.get(3)?,
        attendance_date: r.get(4)?,
        session_number: r.get(5)?,
        status: r.get(6)?,
        check_in_time: r.get(7)?,
        recorded_by: r.get(8)?,
        notes: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

fn decode(s: StoredRecord) -> CoreResult<AttendanceRecord> {
    let status = AttendanceStatus::parse(&s.status).ok_or_else(|| {
        CoreError::validation(format!("attendance {} has unknown status {:?}", s.id, s.status))
    })?;
    Ok(AttendanceRecord {
        attendance_date: parse_date(&s.attendance_date)?,
        check_in_time: s.check_in_time.as_deref().map(parse_time).transpose()?,
        status,
        id: s.id,
        class_id: s.class_id,
        student_id: s.student_id,
        schedule_id: s.schedule_id,
        session_number: s.session_number,
        recorded_by: s.recorded_by,
        notes: s.notes,
        created_at: s.created_at,
        updated_at: s.updated_at,
    })
}

pub fn get_record(conn: &Connection, attendance_id: &str) -> CoreResult<Option<AttendanceRecord>> {
    let sql = format!("SELECT {} FROM attendance_records WHERE id = ?", RECORD_COLUMNS);
    conn.query_row(&sql, [attendance_id], read_stored)
        .optional()?
        .map(decode)
        .transpose()
}

fn find_by_key(conn: &Connection, key: &AttendanceKey) -> CoreResult<Option<AttendanceRecord>> {
    let sql = format!(
        "SELECT {} FROM attendance_records
         WHERE class_id = ? AND student_id = ? AND schedule_id IS ?
           AND attendance_date = ? AND session_number = ?",
        RECORD_COLUMNS
    );
    conn.query_row(
        &sql,
        rusqlite::params![
            key.class_id,
            key.student_id,
            key.schedule_id,
            format_date(key.attendance_date),
            key.session_number,
        ],
        read_stored,
    )
    .optional()?
    .map(decode)
    .transpose()
}

pub fn list_records(conn: &Connection, class_id: &str, filter: &RecordFilter) -> CoreResult<Vec<AttendanceRecord>> {
    let mut sql = format!(
        "SELECT {} FROM attendance_records WHERE class_id = ?",
        RECORD_COLUMNS
    );
    let mut bind: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(n) = filter.session_number {
        sql.push_str(" AND session_number = ?");
        bind.push(Value::Integer(n));
    }
    if let Some(schedule_id) = &filter.schedule_id {
        sql.push_str(" AND schedule_id = ?");
        bind.push(Value::Text(schedule_id.clone()));
    }
    if let Some(date) = filter.attendance_date {
        sql.push_str(" AND attendance_date = ?");
        bind.push(Value::Text(format_date(date)));
    }
    sql.push_str(" ORDER BY session_number, attendance_date, student_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), read_stored)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode).collect()
}

/// Next per-class session ordinal. Callers hold a write transaction so the
/// read and the following insert are not interleaved with another writer.
///
/// A bulk mark without `session_number` always lands in a fresh session, so
/// resubmitting it adds rows. Callers that want a resubmission to overwrite
/// must repeat the session number they got back.
pub fn next_session_number(conn: &Connection, class_id: &str) -> CoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(session_number), 0) + 1 FROM attendance_records WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?)
}

struct PlannedRow {
    student_id: String,
    status: AttendanceStatus,
    check_in_time: Option<NaiveTime>,
    notes: Option<String>,
}

fn upsert_record(
    conn: &Connection,
    key: &AttendanceKey,
    row: &PlannedRow,
    recorded_by: &str,
) -> CoreResult<AttendanceRecord> {
    let now = Utc::now().to_rfc3339();
    let check_in = row.check_in_time.map(format_time);
    match find_by_key(conn, key)? {
        Some(existing) => {
            conn.execute(
                "UPDATE attendance_records
                 SET status = ?, check_in_time = ?, notes = ?, recorded_by = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    row.status.as_str(),
                    check_in,
                    row.notes,
                    recorded_by,
                    now,
                    existing.id,
                ],
            )?;
            Ok(AttendanceRecord {
                status: row.status,
                check_in_time: row.check_in_time,
                notes: row.notes.clone(),
                recorded_by: recorded_by.to_string(),
                updated_at: now,
                ..existing
            })
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO attendance_records(
                    id, class_id, student_id, schedule_id, attendance_date, session_number,
                    status, check_in_time, recorded_by, notes, created_at, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    key.class_id,
                    key.student_id,
                    key.schedule_id,
                    format_date(key.attendance_date),
                    key.session_number,
                    row.status.as_str(),
                    check_in,
                    recorded_by,
                    row.notes,
                    now,
                    now,
                ],
            )?;
            Ok(AttendanceRecord {
                id,
                class_id: key.class_id.clone(),
                student_id: key.student_id.clone(),
                schedule_id: key.schedule_id.clone(),
                attendance_date: key.attendance_date,
                session_number: key.session_number,
                status: row.status,
                check_in_time: row.check_in_time,
                recorded_by: recorded_by.to_string(),
                notes: row.notes.clone(),
                created_at: now.clone(),
                updated_at: now,
            })
        }
    }
}

fn required_trimmed(v: Option<&str>, what: &str) -> CoreResult<String> {
    v.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::validation(format!("missing {}", what)))
}

/// Plans and writes one session. Runs inside the caller's transaction.
fn write_session(
    conn: &Connection,
    class_id: &str,
    recorded_by: &str,
    entries: &[AttendanceEntry],
    options: &BulkOptions,
) -> CoreResult<BulkOutcome> {
    store::get_class(conn, class_id)?;
    let schedule_id = match options.schedule_id.as_deref().map(str::trim) {
        Some(sid) if !sid.is_empty() => {
            let def = store::get_definition(conn, sid)?;
            if def.class_id != class_id {
                return Err(CoreError::validation(format!(
                    "schedule {} does not belong to class {}",
                    sid, class_id
                )));
            }
            Some(sid.to_string())
        }
        _ => None,
    };
    let attendance_date = options
        .attendance_date
        .unwrap_or_else(|| Local::now().date_naive());
    let session_number = match options.session_number {
        Some(n) if n < 1 => {
            return Err(CoreError::validation("sessionNumber must be positive"));
        }
        Some(n) => n,
        None => next_session_number(conn, class_id)?,
    };

    // Last entry wins when a student is listed twice.
    let mut order: Vec<String> = Vec::new();
    let mut by_student: HashMap<String, &AttendanceEntry> = HashMap::new();
    for entry in entries {
        let sid = required_trimmed(Some(&entry.student_id), "studentId")?;
        if by_student.insert(sid.clone(), entry).is_none() {
            order.push(sid);
        }
    }

    let eligible = enrollment::eligible_student_ids(conn, class_id)?;
    let eligible_set: HashSet<&str> = eligible.iter().map(String::as_str).collect();
    let skipped: Vec<String> = order
        .iter()
        .filter(|sid| !eligible_set.contains(sid.as_str()))
        .cloned()
        .collect();
    if !skipped.is_empty() {
        tracing::warn!(class_id, skipped = ?skipped, "skipping students without an eligible enrollment");
    }

    let targets: Vec<String> = if options.create_for_all {
        eligible.clone()
    } else {
        order
            .into_iter()
            .filter(|sid| eligible_set.contains(sid.as_str()))
            .collect()
    };

    let mut records = Vec::with_capacity(targets.len());
    for student_id in targets {
        let entry = by_student.get(&student_id);
        let row = PlannedRow {
            status: entry
                .and_then(|e| e.status)
                .unwrap_or(options.default_status),
            check_in_time: entry.and_then(|e| e.check_in_time),
            notes: entry.and_then(|e| e.notes.clone()),
            student_id,
        };
        let key = AttendanceKey {
            class_id: class_id.to_string(),
            student_id: row.student_id.clone(),
            schedule_id: schedule_id.clone(),
            attendance_date,
            session_number,
        };
        records.push(upsert_record(conn, &key, &row, recorded_by)?);
    }

    if options.recompute_enrollment_stats {
        let touched: Vec<String> = records.iter().map(|r| r.student_id.clone()).collect();
        enrollment::recompute_stats(conn, class_id, &touched)?;
    }

    tracing::info!(
        class_id,
        session_number,
        written = records.len(),
        skipped = skipped.len(),
        "attendance session written"
    );
    Ok(BulkOutcome {
        session_number,
        records,
        skipped,
    })
}

fn begin_write(conn: &Connection) -> CoreResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

/// Idempotent bulk write of one attendance session for a class.
///
/// Rows are keyed by (class, student, schedule, date, session); resubmitting
/// the same session overwrites status, notes and check-in time. Ineligible
/// students are skipped. Every row commits or none does.
pub fn mark_attendance_bulk(
    conn: &Connection,
    class_id: &str,
    entries: &[AttendanceEntry],
    options: &BulkOptions,
) -> CoreResult<BulkOutcome> {
    let class_id = required_trimmed(Some(class_id), "classId")?;
    let recorded_by = required_trimmed(options.recorded_by.as_deref(), "recordedBy")?;

    let tx = begin_write(conn)?;
    let outcome = write_session(&tx, &class_id, &recorded_by, entries, options)?;
    tx.commit()?;
    Ok(outcome)
}

/// Updates one row by surrogate id or natural key. A natural key that matches
/// nothing is created through the bulk path instead of failing.
pub fn update_attendance_record(
    conn: &Connection,
    identifier: &AttendanceIdentifier,
    patch: &AttendancePatch,
    defaults: &BulkOptions,
) -> CoreResult<AttendanceRecord> {
    let tx = begin_write(conn)?;
    let existing = match identifier {
        AttendanceIdentifier::Id(id) => Some(
            get_record(&tx, id)?
                .ok_or_else(|| CoreError::not_found(format!("attendance {} not found", id)))?,
        ),
        AttendanceIdentifier::Key(key) => find_by_key(&tx, key)?,
    };

    let record = match (existing, identifier) {
        (Some(mut record), _) => {
            if let Some(status) = patch.status {
                record.status = status;
            }
            if let Some(notes) = &patch.notes {
                record.notes = notes.clone();
            }
            if let Some(check_in) = patch.check_in_time {
                record.check_in_time = check_in;
            }
            if let Some(by) = patch.recorded_by.as_deref().map(str::trim) {
                if !by.is_empty() {
                    record.recorded_by = by.to_string();
                }
            }
            record.updated_at = Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE attendance_records
                 SET status = ?, notes = ?, check_in_time = ?, recorded_by = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    record.status.as_str(),
                    record.notes,
                    record.check_in_time.map(format_time),
                    record.recorded_by,
                    record.updated_at,
                    record.id,
                ],
            )?;
            if defaults.recompute_enrollment_stats {
                enrollment::recompute_stats(&tx, &record.class_id, &[record.student_id.clone()])?;
            }
            record
        }
        (None, AttendanceIdentifier::Key(key)) => {
            let recorded_by = required_trimmed(patch.recorded_by.as_deref(), "recordedBy")?;
            let class_id = required_trimmed(Some(&key.class_id), "classId")?;
            let options = BulkOptions {
                recorded_by: Some(recorded_by.clone()),
                schedule_id: key.schedule_id.clone(),
                attendance_date: Some(key.attendance_date),
                session_number: Some(key.session_number),
                create_for_all: false,
                ..defaults.clone()
            };
            let entry = AttendanceEntry {
                student_id: key.student_id.clone(),
                status: patch.status,
                check_in_time: patch.check_in_time.flatten(),
                notes: patch.notes.clone().flatten(),
            };
            let outcome = write_session(&tx, &class_id, &recorded_by, &[entry], &options)?;
            outcome.records.into_iter().next().ok_or_else(|| {
                CoreError::validation(format!(
                    "student {} is not eligible for attendance in class {}",
                    key.student_id, class_id
                ))
            })?
        }
        (None, AttendanceIdentifier::Id(id)) => {
            return Err(CoreError::not_found(format!("attendance {} not found", id)));
        }
    };
    tx.commit()?;
    Ok(record)
}

/// Resolves the attendance session already taken for one occurrence, with the
/// roster of students who may appear in it.
pub fn open_occurrence(conn: &Connection, schedule_id: &str, date: NaiveDate) -> CoreResult<OccurrenceSession> {
    let def = store::get_definition(conn, schedule_id)?;
    if def.is_deleted_on(date) || !def.matches_date(date) {
        return Err(CoreError::validation(format!(
            "{} is not an occurrence of schedule {}",
            format_date(date),
            schedule_id
        )));
    }
    if !def.effective_active(date) {
        return Err(CoreError::validation(format!(
            "occurrence {} of schedule {} is cancelled",
            format_date(date),
            schedule_id
        )));
    }

    let session_number: Option<i64> = conn.query_row(
        "SELECT MAX(session_number) FROM attendance_records
         WHERE class_id = ? AND schedule_id = ? AND attendance_date = ?",
        (&def.class_id, schedule_id, format_date(date)),
        |r| r.get(0),
    )?;
    let records = match session_number {
        Some(n) => list_records(
            conn,
            &def.class_id,
            &RecordFilter {
                session_number: Some(n),
                schedule_id: Some(schedule_id.to_string()),
                attendance_date: Some(date),
            },
        )?,
        None => Vec::new(),
    };
    let roster = enrollment::eligible_roster(conn, &def.class_id)?;
    Ok(OccurrenceSession {
        schedule_id: schedule_id.to_string(),
        class_id: def.class_id,
        date,
        session_number,
        records,
        roster,
    })
}
