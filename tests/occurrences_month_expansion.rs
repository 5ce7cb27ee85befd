mod test_support;

use serde_json::{json, Value};
use test_support::Sidecar;

fn september(s: &mut Sidecar, extra: Value) -> Vec<Value> {
    let mut params = json!({ "month": 9, "year": 2024 });
    if let (Some(p), Some(e)) = (params.as_object_mut(), extra.as_object()) {
        for (k, v) in e {
            p.insert(k.clone(), v.clone());
        }
    }
    s.ok("occurrences.list", params)["occurrences"]
        .as_array()
        .expect("occurrences")
        .clone()
}

fn dates_with_active(rows: &[Value]) -> Vec<(String, bool)> {
    rows.iter()
        .map(|o| {
            (
                o["date"].as_str().expect("date").to_string(),
                o["isActive"].as_bool().expect("isActive"),
            )
        })
        .collect()
}

#[test]
fn recurring_series_expands_to_every_monday_in_range() {
    let mut s = Sidecar::open("timetabled-occ-a");
    let class_id = s.create_class("MATH101", "lect-1");
    s.monday_series(&class_id);

    let rows = september(&mut s, json!({}));
    assert_eq!(
        dates_with_active(&rows),
        vec![
            ("2024-09-02".to_string(), true),
            ("2024-09-09".to_string(), true),
            ("2024-09-16".to_string(), true),
            ("2024-09-23".to_string(), true),
            ("2024-09-30".to_string(), true),
        ]
    );
    assert_eq!(rows[0]["startTime"], "07:00:00");
    assert_eq!(rows[0]["lecturerId"], "lect-1");
    assert_eq!(rows[0]["exception"], "none");
    assert_eq!(rows[0]["isConflict"], false);

    // Outside the effective range nothing is produced.
    let august = s.ok("occurrences.list", json!({ "month": 8, "year": 2024 }));
    assert_eq!(august["occurrences"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn cancelling_one_date_only_hides_that_date() {
    let mut s = Sidecar::open("timetabled-occ-b");
    let class_id = s.create_class("MATH101", "lect-1");
    let schedule_id = s.monday_series(&class_id);

    let toggled = s.ok(
        "occurrences.toggle",
        json!({ "scheduleId": schedule_id, "date": "2024-09-09", "isActive": false }),
    );
    assert_eq!(toggled["state"], "cancelled_occurrence");
    assert_eq!(toggled["schedule"]["cancelledDates"], json!(["2024-09-09"]));

    let all = september(&mut s, json!({ "includeInactive": true }));
    let flags = dates_with_active(&all);
    assert_eq!(flags.len(), 5);
    for (date, active) in &flags {
        assert_eq!(*active, date != "2024-09-09", "{}", date);
    }
    let cancelled = all
        .iter()
        .find(|o| o["date"] == "2024-09-09")
        .expect("cancelled row");
    assert_eq!(cancelled["exception"], "cancelled");

    let visible = september(&mut s, json!({}));
    assert_eq!(visible.len(), 4);

    // Restoring drops the entry again.
    let restored = s.ok(
        "occurrences.toggle",
        json!({ "scheduleId": schedule_id, "date": "2024-09-09", "isActive": true }),
    );
    assert_eq!(restored["state"], "scheduled");
    assert_eq!(restored["schedule"]["cancelledDates"], json!([]));
}

#[test]
fn listed_date_on_inactive_series_is_restored() {
    let mut s = Sidecar::open("timetabled-occ-c");
    let class_id = s.create_class("MATH101", "lect-1");
    let schedule_id = s.monday_series(&class_id);

    s.ok(
        "occurrences.toggle",
        json!({ "scheduleId": schedule_id, "date": "2024-09-09", "isActive": false }),
    );
    let series = s.ok(
        "occurrences.toggle",
        json!({ "scheduleId": schedule_id, "isActive": false }),
    );
    assert_eq!(series["state"], "globally_inactive");

    let all = september(&mut s, json!({ "includeInactive": true }));
    for (date, active) in dates_with_active(&all) {
        assert_eq!(active, date == "2024-09-09", "{}", date);
    }
    let state = s.ok(
        "occurrences.state",
        json!({ "scheduleId": schedule_id, "date": "2024-09-09" }),
    );
    assert_eq!(state["state"], "restored_occurrence");

    let visible = september(&mut s, json!({}));
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["exception"], "restored");

    // cancelledDate alone flips the date's current state.
    let flipped = s.ok(
        "occurrences.toggle",
        json!({ "scheduleId": schedule_id, "cancelledDate": "2024-09-16" }),
    );
    assert_eq!(flipped["state"], "restored_occurrence");
}

#[test]
fn shared_room_overlap_is_flagged_on_both_sides() {
    let mut s = Sidecar::open("timetabled-occ-d");
    let math = s.create_class("MATH101", "lect-1");
    let phys = s.create_class("PHYS201", "lect-2");
    let hist = s.create_class("HIST110", "lect-3");
    let a = s.ok(
        "schedules.create",
        json!({ "classId": math, "date": "2024-09-11", "startTime": "07:00",
                "endTime": "08:00", "room": "A101", "building": "Main" }),
    )["scheduleId"]
        .as_str()
        .expect("a")
        .to_string();
    let b = s.ok(
        "schedules.create",
        json!({ "classId": phys, "date": "2024-09-11", "startTime": "07:30",
                "endTime": "09:00", "room": " a101 ", "building": "main" }),
    )["scheduleId"]
        .as_str()
        .expect("b")
        .to_string();
    // Overlapping but elsewhere with another instructor: no conflict.
    s.ok(
        "schedules.create",
        json!({ "classId": hist, "date": "2024-09-11", "startTime": "07:30",
                "endTime": "08:30", "room": "B202", "building": "Main" }),
    );

    let listed = s.ok("occurrences.list", json!({ "month": 9, "year": 2024 }));
    assert_eq!(listed["conflictCount"], 2);
    let rows = listed["occurrences"].as_array().expect("rows");
    let by_id = |id: &str| rows.iter().find(|o| o["scheduleId"] == id).expect("row").clone();
    assert_eq!(by_id(a.as_str())["isConflict"], true);
    assert_eq!(by_id(a.as_str())["conflictsWith"], json!([b]));
    assert_eq!(by_id(b.as_str())["isConflict"], true);
    assert_eq!(by_id(b.as_str())["conflictsWith"], json!([a]));
    let hist_row = rows
        .iter()
        .find(|o| o["classId"] == hist)
        .expect("hist row");
    assert_eq!(hist_row["isConflict"], false);

    // Filtering narrows the view but keeps conflicts found against the whole timetable.
    let only_math = september(&mut s, json!({ "courseCode": "math101" }));
    assert_eq!(only_math.len(), 1);
    assert_eq!(only_math[0]["isConflict"], true);
}

#[test]
fn own_view_flags_any_overlap_for_one_lecturer() {
    let mut s = Sidecar::open("timetabled-occ-own");
    let math = s.create_class("MATH101", "lect-1");
    let chem = s.create_class("CHEM100", "lect-2");
    s.ok(
        "schedules.create",
        json!({ "classId": math, "date": "2024-09-12", "startTime": "09:00",
                "endTime": "10:00", "room": "A1" }),
    );
    // lect-1 substitutes in another room at an overlapping time.
    s.ok(
        "schedules.create",
        json!({ "classId": chem, "date": "2024-09-12", "startTime": "09:30",
                "endTime": "10:30", "room": "Z9", "lecturerOverride": "lect-1" }),
    );

    let own = september(&mut s, json!({ "lecturerId": "lect-1" }));
    assert_eq!(own.len(), 2);
    assert!(own.iter().all(|o| o["isConflict"] == true));
    assert!(own.iter().any(|o| o["isSubstitute"] == true));

    let other = september(&mut s, json!({ "lecturerId": "lect-2" }));
    assert!(other.is_empty());
}

#[test]
fn schedule_creation_is_validated() {
    let mut s = Sidecar::open("timetabled-occ-validate");
    let class_id = s.create_class("MATH101", "lect-1");

    let cases = [
        json!({ "classId": class_id, "dayOfWeek": 1, "effectiveFrom": "2024-09-02",
                "startTime": "09:00", "endTime": "08:00" }),
        json!({ "classId": class_id, "dayOfWeek": 8, "effectiveFrom": "2024-09-02",
                "startTime": "08:00", "endTime": "09:00" }),
        json!({ "classId": class_id, "dayOfWeek": 1, "startTime": "08:00", "endTime": "09:00" }),
        json!({ "classId": class_id, "dayOfWeek": 1, "effectiveFrom": "2024-09-30",
                "effectiveTo": "2024-09-01", "startTime": "08:00", "endTime": "09:00" }),
        json!({ "classId": class_id, "date": "2024-13-01", "startTime": "08:00", "endTime": "09:00" }),
        json!({ "classId": class_id, "startTime": "08:00", "endTime": "09:00" }),
        json!({ "classId": class_id, "date": "2024-09-02", "startTime": "08:00",
                "endTime": "09:00", "scheduleType": "party" }),
    ];
    for params in cases {
        assert_eq!(s.err("schedules.create", params.clone()), "bad_params", "{}", params);
    }
    assert_eq!(
        s.err(
            "schedules.create",
            json!({ "classId": "nope", "date": "2024-09-02", "startTime": "08:00", "endTime": "09:00" })
        ),
        "not_found"
    );
    assert_eq!(s.err("occurrences.list", json!({ "month": 13, "year": 2024 })), "bad_params");

    let listed = s.ok("schedules.list", json!({ "classId": class_id }));
    assert_eq!(listed["schedules"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn corrupt_stored_row_is_skipped_with_a_warning() {
    let mut s = Sidecar::open("timetabled-occ-corrupt");
    let class_id = s.create_class("MATH101", "lect-1");
    s.monday_series(&class_id);

    let conn = rusqlite::Connection::open(s.workspace.join("timetable.sqlite3")).expect("open db");
    conn.execute(
        "INSERT INTO schedules(id, class_id, day_of_week, start_time, end_time,
            effective_from, effective_to)
         VALUES('bad', ?, 9, '10:00:00', '11:00:00', '2024-09-01', '2024-12-20')",
        [&class_id],
    )
    .expect("insert corrupt row");
    drop(conn);

    let listed = s.ok("occurrences.list", json!({ "month": 9, "year": 2024 }));
    let rows = listed["occurrences"].as_array().expect("occurrences");
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|o| o["scheduleId"] != "bad"));
    let warnings = listed["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["scheduleId"], "bad");
}
