use crate::error::{CoreError, CoreResult};
use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Lecture,
    Lab,
    Tutorial,
    Exam,
    Review,
}

impl ScheduleType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lecture" => Some(Self::Lecture),
            "lab" => Some(Self::Lab),
            "tutorial" => Some(Self::Tutorial),
            "exam" => Some(Self::Exam),
            "review" => Some(Self::Review),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lecture => "lecture",
            Self::Lab => "lab",
            Self::Tutorial => "tutorial",
            Self::Exam => "exam",
            Self::Review => "review",
        }
    }
}

/// A stored schedule row: either a weekly series or a single dated meeting.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDefinition {
    pub id: String,
    pub class_id: String,
    /// ISO weekday, Monday = 1.
    pub day_of_week: Option<u32>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<NaiveDate>,
    pub room: Option<String>,
    pub building: Option<String>,
    pub campus: Option<String>,
    pub schedule_type: ScheduleType,
    pub is_active: bool,
    pub is_online: bool,
    pub online_url: Option<String>,
    pub lecturer_override: Option<String>,
    pub cancelled_dates: BTreeSet<NaiveDate>,
    pub deleted_dates: BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    SingleDay(NaiveDate),
    Weekly {
        day_of_week: u32,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
}

/// Per-date exception tag derived from `is_active` and `cancelled_dates`.
///
/// Storage keeps a single date list whose meaning flips with the series flag:
/// on an active series a listed date is cancelled, on an inactive series it is
/// restored. Callers reason about the tag, never the raw list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DateException {
    None,
    Cancelled,
    Restored,
}

impl ScheduleDefinition {
    pub fn recurrence(&self) -> Option<Recurrence> {
        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to) {
            if from == to {
                return Some(Recurrence::SingleDay(from));
            }
        }
        self.day_of_week.map(|day_of_week| Recurrence::Weekly {
            day_of_week,
            from: self.effective_from,
            to: self.effective_to,
        })
    }

    pub fn is_single_day(&self) -> bool {
        matches!(self.recurrence(), Some(Recurrence::SingleDay(_)))
    }

    /// True when `date` falls on the definition's pattern, ignoring exceptions.
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        match self.recurrence() {
            Some(Recurrence::SingleDay(d)) => d == date,
            Some(Recurrence::Weekly {
                day_of_week,
                from,
                to,
            }) => {
                date.weekday().number_from_monday() == day_of_week
                    && from.map(|f| date >= f).unwrap_or(true)
                    && to.map(|t| date <= t).unwrap_or(true)
            }
            None => false,
        }
    }

    pub fn is_deleted_on(&self, date: NaiveDate) -> bool {
        self.deleted_dates.contains(&date)
    }

    pub fn exception_on(&self, date: NaiveDate) -> DateException {
        if !self.cancelled_dates.contains(&date) {
            DateException::None
        } else if self.is_active {
            DateException::Cancelled
        } else {
            DateException::Restored
        }
    }

    pub fn effective_active(&self, date: NaiveDate) -> bool {
        match self.exception_on(date) {
            DateException::None => self.is_active,
            DateException::Cancelled => false,
            DateException::Restored => true,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.start_time >= self.end_time {
            return Err(CoreError::validation("startTime must be before endTime"));
        }
        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to) {
            if from > to {
                return Err(CoreError::validation(
                    "effectiveFrom must not be after effectiveTo",
                ));
            }
        }
        if let Some(d) = self.day_of_week {
            if !(1..=7).contains(&d) {
                return Err(CoreError::validation("dayOfWeek must be in 1..=7"));
            }
        }
        if self.recurrence().is_none() {
            return Err(CoreError::validation(
                "schedule needs dayOfWeek or a single date (effectiveFrom == effectiveTo)",
            ));
        }
        Ok(())
    }
}

/// Catalog facts needed to resolve an occurrence without further lookups.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub course_code: Option<String>,
    pub default_lecturer_id: Option<String>,
    pub default_room: Option<String>,
    pub default_building: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub schedule_id: String,
    pub class_id: String,
    pub class_name: String,
    pub course_code: Option<String>,
    pub date: NaiveDate,
    pub day_of_week: u32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: Option<String>,
    pub building: Option<String>,
    pub campus: Option<String>,
    pub schedule_type: ScheduleType,
    pub is_online: bool,
    pub online_url: Option<String>,
    pub lecturer_id: Option<String>,
    pub is_substitute: bool,
    pub is_active: bool,
    pub exception: DateException,
    pub is_single_day: bool,
    pub is_conflict: bool,
    pub conflicts_with: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityWarning {
    pub schedule_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub occurrences: Vec<Occurrence>,
    pub warnings: Vec<IntegrityWarning>,
}

fn resolve_occurrence(def: &ScheduleDefinition, class: &ClassInfo, date: NaiveDate) -> Occurrence {
    let lecturer_id = def
        .lecturer_override
        .clone()
        .or_else(|| class.default_lecturer_id.clone());
    Occurrence {
        schedule_id: def.id.clone(),
        class_id: def.class_id.clone(),
        class_name: class.name.clone(),
        course_code: class.course_code.clone(),
        date,
        day_of_week: date.weekday().number_from_monday(),
        start_time: def.start_time,
        end_time: def.end_time,
        room: def.room.clone().or_else(|| class.default_room.clone()),
        building: def.building.clone().or_else(|| class.default_building.clone()),
        campus: def.campus.clone(),
        schedule_type: def.schedule_type,
        is_online: def.is_online,
        online_url: def.online_url.clone(),
        lecturer_id,
        is_substitute: def.lecturer_override.is_some(),
        is_active: def.effective_active(date),
        exception: def.exception_on(date),
        is_single_day: def.is_single_day(),
        is_conflict: false,
        conflicts_with: Vec::new(),
    }
}

/// Expands definitions into concrete dated occurrences within `[start, end]`.
///
/// Deleted dates never produce an occurrence. Definitions that match neither
/// the weekly nor the single-day pattern are skipped and reported as warnings.
pub fn expand(
    definitions: &[ScheduleDefinition],
    classes: &HashMap<String, ClassInfo>,
    start: NaiveDate,
    end: NaiveDate,
) -> CoreResult<Expansion> {
    if start > end {
        return Err(CoreError::validation("range start must not be after range end"));
    }

    let mut out = Expansion::default();
    for def in definitions {
        let Some(class) = classes.get(&def.class_id) else {
            tracing::warn!(schedule_id = %def.id, class_id = %def.class_id, "schedule references unknown class");
            out.warnings.push(IntegrityWarning {
                schedule_id: def.id.clone(),
                message: format!("class {} not found", def.class_id),
            });
            continue;
        };
        let Some(recurrence) = def.recurrence() else {
            tracing::warn!(schedule_id = %def.id, "schedule matches neither weekly nor single-day pattern");
            out.warnings.push(IntegrityWarning {
                schedule_id: def.id.clone(),
                message: "schedule has neither dayOfWeek nor a single effective date".to_string(),
            });
            continue;
        };

        let (lo, hi) = match recurrence {
            Recurrence::SingleDay(d) => (d.max(start), d.min(end)),
            Recurrence::Weekly { from, to, .. } => (
                from.map(|f| f.max(start)).unwrap_or(start),
                to.map(|t| t.min(end)).unwrap_or(end),
            ),
        };
        if lo > hi {
            continue;
        }
        for date in lo.iter_days().take_while(|d| *d <= hi) {
            if def.is_deleted_on(date) || !def.matches_date(date) {
                continue;
            }
            out.occurrences.push(resolve_occurrence(def, class, date));
        }
    }

    out.occurrences.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then(a.start_time.cmp(&b.start_time))
            .then(a.schedule_id.cmp(&b.schedule_id))
    });
    Ok(out)
}

pub fn month_range(year: i32, month: u32) -> CoreResult<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| CoreError::validation("month must be between 1 and 12"))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| CoreError::validation("year out of range"))?;
    let last = next
        .pred_opt()
        .ok_or_else(|| CoreError::validation("year out of range"))?;
    Ok((first, last))
}

pub fn parse_date(raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| CoreError::validation(format!("malformed date: {:?} (expected YYYY-MM-DD)", raw)))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_time(raw: &str) -> CoreResult<NaiveTime> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| CoreError::validation(format!("malformed time: {:?} (expected HH:MM)", raw)))
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

/// Decodes a persisted exception list (JSON array of `YYYY-MM-DD` strings).
pub fn parse_date_list(raw: &str) -> CoreResult<BTreeSet<NaiveDate>> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let items: Vec<String> = serde_json::from_str(raw)?;
    items.iter().map(|s| parse_date(s)).collect()
}

pub fn format_date_list(dates: &BTreeSet<NaiveDate>) -> String {
    let items: Vec<String> = dates.iter().copied().map(format_date).collect();
    serde_json::Value::from(items).to_string()
}
