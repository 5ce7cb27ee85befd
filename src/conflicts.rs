use crate::schedule::Occurrence;
use chrono::{NaiveDate, NaiveTime};
use std::collections::{BTreeMap, HashMap};

/// Which double-booking rule applies to a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Privileged view across people: overlap plus shared room or instructor.
    CrossPerson,
    /// A viewer's own occurrences: any overlap is a conflict.
    OwnOccurrences,
}

fn normalize(s: Option<&str>) -> String {
    s.unwrap_or("").trim().to_lowercase()
}

pub fn overlaps(a: &Occurrence, b: &Occurrence) -> bool {
    a.start_time < b.end_time && b.start_time < a.end_time
}

fn same_room(a: &Occurrence, b: &Occurrence) -> bool {
    let room_a = normalize(a.room.as_deref());
    if room_a.is_empty() || room_a != normalize(b.room.as_deref()) {
        return false;
    }
    normalize(a.building.as_deref()) == normalize(b.building.as_deref())
}

fn same_instructor(a: &Occurrence, b: &Occurrence) -> bool {
    match (a.lecturer_id.as_deref(), b.lecturer_id.as_deref()) {
        (Some(x), Some(y)) => !x.trim().is_empty() && x.trim() == y.trim(),
        _ => false,
    }
}

/// Pairwise conflict test. Symmetric, and never true for an occurrence
/// against itself.
pub fn conflicts(a: &Occurrence, b: &Occurrence, scope: ConflictScope) -> bool {
    if a.schedule_id == b.schedule_id && a.date == b.date {
        return false;
    }
    if !a.is_active || !b.is_active || a.date != b.date || !overlaps(a, b) {
        return false;
    }
    match scope {
        ConflictScope::OwnOccurrences => true,
        ConflictScope::CrossPerson => same_room(a, b) || same_instructor(a, b),
    }
}

type DuplicateKey = (NaiveDate, NaiveTime, NaiveTime, String, String, String);

fn duplicate_key(o: &Occurrence) -> DuplicateKey {
    let course = o
        .course_code
        .as_deref()
        .map(|c| c.trim().to_lowercase())
        .unwrap_or_else(|| o.class_id.clone());
    (
        o.date,
        o.start_time,
        o.end_time,
        normalize(o.room.as_deref()),
        normalize(o.building.as_deref()),
        course,
    )
}

/// Drops exact duplicates (same date, times, room, building and course).
/// Each group keeps the position of its first entry; an active copy
/// replaces an inactive one.
pub fn dedupe(occurrences: Vec<Occurrence>) -> Vec<Occurrence> {
    let mut slot: HashMap<DuplicateKey, usize> = HashMap::new();
    let mut out: Vec<Occurrence> = Vec::with_capacity(occurrences.len());
    for o in occurrences {
        match slot.get(&duplicate_key(&o)) {
            Some(&i) => {
                if o.is_active && !out[i].is_active {
                    out[i] = o;
                }
            }
            None => {
                slot.insert(duplicate_key(&o), out.len());
                out.push(o);
            }
        }
    }
    out
}

/// Annotates one day's occurrences with `is_conflict` / `conflicts_with`.
pub fn detect_conflicts(occurrences: Vec<Occurrence>, scope: ConflictScope) -> Vec<Occurrence> {
    let mut day = dedupe(occurrences);
    for o in day.iter_mut() {
        o.is_conflict = false;
        o.conflicts_with.clear();
    }
    for i in 0..day.len() {
        for j in (i + 1)..day.len() {
            if !conflicts(&day[i], &day[j], scope) {
                continue;
            }
            let (left, right) = day.split_at_mut(j);
            let (a, b) = (&mut left[i], &mut right[0]);
            a.is_conflict = true;
            b.is_conflict = true;
            a.conflicts_with.push(b.schedule_id.clone());
            b.conflicts_with.push(a.schedule_id.clone());
        }
    }
    for o in day.iter_mut() {
        o.conflicts_with.sort();
        o.conflicts_with.dedup();
    }
    day
}

/// Runs detection independently for each date of a multi-day result.
pub fn detect_by_date(occurrences: Vec<Occurrence>, scope: ConflictScope) -> Vec<Occurrence> {
    let mut by_date: BTreeMap<NaiveDate, Vec<Occurrence>> = BTreeMap::new();
    for o in occurrences {
        by_date.entry(o.date).or_default().push(o);
    }
    by_date
        .into_values()
        .flat_map(|day| detect_conflicts(day, scope))
        .collect()
}
