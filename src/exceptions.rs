use crate::error::{CoreError, CoreResult};
use crate::schedule::{format_date, DateException, ScheduleDefinition, ScheduleType};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

/// State of one (definition, date) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceState {
    Scheduled,
    CancelledOccurrence,
    RestoredOccurrence,
    DeletedOccurrence,
    GloballyInactive,
}

impl OccurrenceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::CancelledOccurrence => "cancelled_occurrence",
            Self::RestoredOccurrence => "restored_occurrence",
            Self::DeletedOccurrence => "deleted_occurrence",
            Self::GloballyInactive => "globally_inactive",
        }
    }
}

pub fn state_of(def: &ScheduleDefinition, date: NaiveDate) -> OccurrenceState {
    if def.is_deleted_on(date) {
        return OccurrenceState::DeletedOccurrence;
    }
    match def.exception_on(date) {
        DateException::Cancelled => OccurrenceState::CancelledOccurrence,
        DateException::Restored => OccurrenceState::RestoredOccurrence,
        DateException::None if def.is_active => OccurrenceState::Scheduled,
        DateException::None if def.is_single_day() => OccurrenceState::CancelledOccurrence,
        DateException::None => OccurrenceState::GloballyInactive,
    }
}

fn ensure_occurrence(def: &ScheduleDefinition, date: NaiveDate) -> CoreResult<()> {
    if !def.matches_date(date) {
        return Err(CoreError::validation(format!(
            "{} is not an occurrence of schedule {}",
            format_date(date),
            def.id
        )));
    }
    if def.is_deleted_on(date) {
        return Err(CoreError::not_found(format!(
            "occurrence {} of schedule {} was deleted",
            format_date(date),
            def.id
        )));
    }
    Ok(())
}

/// Sets the effective state of a single date without touching the series flag.
///
/// On a recurring series the date is listed in `cancelled_dates` exactly when
/// the wanted state differs from `is_active`. A single-day definition has no
/// series to deviate from, so its flag is toggled directly.
pub fn set_occurrence_active(
    def: &mut ScheduleDefinition,
    date: NaiveDate,
    active: bool,
) -> CoreResult<OccurrenceState> {
    ensure_occurrence(def, date)?;
    if def.is_single_day() {
        def.is_active = active;
        def.cancelled_dates.remove(&date);
    } else if active == def.is_active {
        def.cancelled_dates.remove(&date);
    } else {
        def.cancelled_dates.insert(date);
    }
    Ok(state_of(def, date))
}

/// Toggles the whole series. Listed dates keep their entry and so flip meaning.
pub fn set_series_active(def: &mut ScheduleDefinition, active: bool) -> OccurrenceState {
    def.is_active = active;
    if active {
        OccurrenceState::Scheduled
    } else {
        OccurrenceState::GloballyInactive
    }
}

/// Field-level edit of a definition; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulePatch {
    pub day_of_week: Option<Option<u32>>,
    pub effective_from: Option<Option<NaiveDate>>,
    pub effective_to: Option<Option<NaiveDate>>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub room: Option<Option<String>>,
    pub building: Option<Option<String>>,
    pub campus: Option<Option<String>>,
    pub schedule_type: Option<ScheduleType>,
    pub is_active: Option<bool>,
    pub is_online: Option<bool>,
    pub online_url: Option<Option<String>>,
    pub lecturer_override: Option<Option<String>>,
}

impl SchedulePatch {
    pub fn touches_recurrence(&self) -> bool {
        self.day_of_week.is_some() || self.effective_from.is_some() || self.effective_to.is_some()
    }

    pub fn apply_to(&self, def: &mut ScheduleDefinition) {
        if let Some(v) = self.day_of_week {
            def.day_of_week = v;
        }
        if let Some(v) = self.effective_from {
            def.effective_from = v;
        }
        if let Some(v) = self.effective_to {
            def.effective_to = v;
        }
        if let Some(v) = self.start_time {
            def.start_time = v;
        }
        if let Some(v) = self.end_time {
            def.end_time = v;
        }
        if let Some(v) = &self.room {
            def.room = v.clone();
        }
        if let Some(v) = &self.building {
            def.building = v.clone();
        }
        if let Some(v) = &self.campus {
            def.campus = v.clone();
        }
        if let Some(v) = self.schedule_type {
            def.schedule_type = v;
        }
        if let Some(v) = self.is_active {
            def.is_active = v;
        }
        if let Some(v) = self.is_online {
            def.is_online = v;
        }
        if let Some(v) = &self.online_url {
            def.online_url = v.clone();
        }
        if let Some(v) = &self.lecturer_override {
            def.lecturer_override = v.clone();
        }
    }
}

pub fn edit_series(def: &mut ScheduleDefinition, patch: &SchedulePatch) -> CoreResult<()> {
    let mut next = def.clone();
    patch.apply_to(&mut next);
    next.validate()?;
    *def = next;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    UpdatedInPlace,
    /// The parent gained a deleted date; the returned definition replaces it
    /// for that day only.
    Split(ScheduleDefinition),
}

/// Edits one occurrence. Recurring series are split on write: the date moves
/// into the parent's `deleted_dates` and a single-day copy carries the edit.
pub fn edit_occurrence(
    def: &mut ScheduleDefinition,
    date: NaiveDate,
    patch: &SchedulePatch,
    new_id: String,
) -> CoreResult<EditOutcome> {
    if patch.touches_recurrence() {
        return Err(CoreError::validation(
            "dayOfWeek, effectiveFrom and effectiveTo cannot change for a single occurrence",
        ));
    }
    ensure_occurrence(def, date)?;

    if def.is_single_day() {
        edit_series(def, patch)?;
        return Ok(EditOutcome::UpdatedInPlace);
    }

    let mut child = def.clone();
    child.id = new_id;
    child.day_of_week = None;
    child.effective_from = Some(date);
    child.effective_to = Some(date);
    child.is_active = def.effective_active(date);
    child.cancelled_dates.clear();
    child.deleted_dates.clear();
    patch.apply_to(&mut child);
    child.validate()?;

    def.deleted_dates.insert(date);
    Ok(EditOutcome::Split(child))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    DateRemoved,
    DefinitionRemoved,
}

pub fn delete_occurrence(
    def: &mut ScheduleDefinition,
    date: Option<NaiveDate>,
) -> CoreResult<DeleteOutcome> {
    let Some(date) = date else {
        return Ok(DeleteOutcome::DefinitionRemoved);
    };
    ensure_occurrence(def, date)?;
    if def.is_single_day() {
        return Ok(DeleteOutcome::DefinitionRemoved);
    }
    def.deleted_dates.insert(date);
    Ok(DeleteOutcome::DateRemoved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{parse_date, parse_time};
    use std::collections::BTreeSet;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).expect("date")
    }

    fn series() -> ScheduleDefinition {
        ScheduleDefinition {
            id: "s1".into(),
            class_id: "c1".into(),
            day_of_week: Some(1),
            start_time: parse_time("07:00").expect("time"),
            end_time: parse_time("08:50").expect("time"),
            effective_from: Some(d("2024-09-02")),
            effective_to: Some(d("2024-12-20")),
            room: Some("A101".into()),
            building: Some("Main".into()),
            campus: None,
            schedule_type: ScheduleType::Lecture,
            is_active: true,
            is_online: false,
            online_url: None,
            lecturer_override: None,
            cancelled_dates: BTreeSet::new(),
            deleted_dates: BTreeSet::new(),
        }
    }

    #[test]
    fn cancel_and_uncancel_one_date() {
        let mut s = series();
        let state = set_occurrence_active(&mut s, d("2024-09-09"), false).expect("cancel");
        assert_eq!(state, OccurrenceState::CancelledOccurrence);
        assert!(s.is_active);
        assert!(!s.effective_active(d("2024-09-09")));

        // Idempotent.
        set_occurrence_active(&mut s, d("2024-09-09"), false).expect("cancel again");
        assert_eq!(s.cancelled_dates.len(), 1);

        let state = set_occurrence_active(&mut s, d("2024-09-09"), true).expect("restore");
        assert_eq!(state, OccurrenceState::Scheduled);
        assert!(s.cancelled_dates.is_empty());
    }

    #[test]
    fn restore_one_date_of_inactive_series() {
        let mut s = series();
        assert_eq!(set_series_active(&mut s, false), OccurrenceState::GloballyInactive);
        assert_eq!(state_of(&s, d("2024-09-16")), OccurrenceState::GloballyInactive);

        let state = set_occurrence_active(&mut s, d("2024-09-16"), true).expect("restore");
        assert_eq!(state, OccurrenceState::RestoredOccurrence);
        assert!(s.effective_active(d("2024-09-16")));
        assert!(!s.effective_active(d("2024-09-23")));
        assert_eq!(s.cancelled_dates.iter().copied().collect::<Vec<_>>(), vec![d("2024-09-16")]);
    }

    #[test]
    fn toggle_rejects_dates_off_the_pattern() {
        let mut s = series();
        assert!(matches!(
            set_occurrence_active(&mut s, d("2024-09-10"), false),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            set_occurrence_active(&mut s, d("2025-01-06"), false),
            Err(CoreError::Validation(_))
        ));
        s.deleted_dates.insert(d("2024-09-09"));
        assert!(matches!(
            set_occurrence_active(&mut s, d("2024-09-09"), false),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn single_day_toggle_flips_flag_directly() {
        let mut s = series();
        s.day_of_week = None;
        s.effective_from = Some(d("2024-09-11"));
        s.effective_to = Some(d("2024-09-11"));
        let state = set_occurrence_active(&mut s, d("2024-09-11"), false).expect("cancel");
        assert_eq!(state, OccurrenceState::CancelledOccurrence);
        assert!(!s.is_active);
        assert!(s.cancelled_dates.is_empty());
        set_occurrence_active(&mut s, d("2024-09-11"), true).expect("restore");
        assert!(s.is_active);
    }

    #[test]
    fn edit_one_day_splits_without_touching_series() {
        let mut s = series();
        let patch = SchedulePatch {
            room: Some(Some("B202".into())),
            lecturer_override: Some(Some("sub-7".into())),
            ..Default::default()
        };
        let outcome = edit_occurrence(&mut s, d("2024-09-16"), &patch, "child".into()).expect("edit");
        let EditOutcome::Split(child) = outcome else {
            panic!("expected split");
        };
        assert_eq!(child.id, "child");
        assert!(child.is_single_day());
        assert_eq!(child.room.as_deref(), Some("B202"));
        assert_eq!(child.lecturer_override.as_deref(), Some("sub-7"));
        assert!(child.matches_date(d("2024-09-16")));

        assert!(s.is_deleted_on(d("2024-09-16")));
        assert_eq!(s.room.as_deref(), Some("A101"));
        assert!(s.lecturer_override.is_none());
        assert!(s.matches_date(d("2024-09-23")));
    }

    #[test]
    fn split_keeps_effective_state_of_the_day() {
        let mut s = series();
        s.cancelled_dates.insert(d("2024-09-09"));
        let patch = SchedulePatch {
            room: Some(Some("C1".into())),
            ..Default::default()
        };
        let EditOutcome::Split(child) =
            edit_occurrence(&mut s, d("2024-09-09"), &patch, "child".into()).expect("edit")
        else {
            panic!("expected split");
        };
        assert!(!child.is_active);
        assert!(child.cancelled_dates.is_empty());
    }

    #[test]
    fn single_occurrence_edit_rejects_recurrence_fields() {
        let mut s = series();
        let patch = SchedulePatch {
            day_of_week: Some(Some(2)),
            ..Default::default()
        };
        let before = s.clone();
        assert!(matches!(
            edit_occurrence(&mut s, d("2024-09-16"), &patch, "x".into()),
            Err(CoreError::Validation(_))
        ));
        assert_eq!(s, before);
    }

    #[test]
    fn invalid_split_leaves_parent_unchanged() {
        let mut s = series();
        let patch = SchedulePatch {
            end_time: Some(parse_time("06:00").expect("time")),
            ..Default::default()
        };
        let before = s.clone();
        assert!(edit_occurrence(&mut s, d("2024-09-16"), &patch, "x".into()).is_err());
        assert_eq!(s, before);
    }

    #[test]
    fn edit_series_validates_ranges() {
        let mut s = series();
        let patch = SchedulePatch {
            effective_to: Some(Some(d("2024-08-01"))),
            ..Default::default()
        };
        assert!(edit_series(&mut s, &patch).is_err());
        assert_eq!(s.effective_to, Some(d("2024-12-20")));
    }

    #[test]
    fn delete_date_or_definition() {
        let mut s = series();
        assert_eq!(
            delete_occurrence(&mut s, Some(d("2024-09-23"))).expect("delete"),
            DeleteOutcome::DateRemoved
        );
        assert_eq!(state_of(&s, d("2024-09-23")), OccurrenceState::DeletedOccurrence);
        assert_eq!(
            delete_occurrence(&mut s, None).expect("delete"),
            DeleteOutcome::DefinitionRemoved
        );

        let mut single = series();
        single.day_of_week = None;
        single.effective_from = Some(d("2024-09-11"));
        single.effective_to = Some(d("2024-09-11"));
        assert_eq!(
            delete_occurrence(&mut single, Some(d("2024-09-11"))).expect("delete"),
            DeleteOutcome::DefinitionRemoved
        );
    }
}
