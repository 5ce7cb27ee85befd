mod test_support;

use serde_json::json;
use test_support::Sidecar;

#[test]
fn setup_defaults_and_validation() {
    let mut s = Sidecar::open("timetabled-setup-defaults");
    let setup = s.ok("setup.get", json!({}));
    assert_eq!(setup["schedule"]["includeInactiveByDefault"], false);
    assert_eq!(setup["schedule"]["defaultScheduleType"], "lecture");
    assert_eq!(setup["attendance"]["defaultStatus"], "present");
    assert_eq!(setup["attendance"]["recomputeEnrollmentStats"], true);

    for (section, patch) in [
        ("schedule", json!({ "includeInactiveByDefault": "yes" })),
        ("schedule", json!({ "defaultScheduleType": "party" })),
        ("attendance", json!({ "defaultStatus": "asleep" })),
        ("attendance", json!({ "unknownField": 1 })),
        ("grading", json!({})),
    ] {
        assert_eq!(
            s.err("setup.update", json!({ "section": section, "patch": patch })),
            "bad_params"
        );
    }
    let unchanged = s.ok("setup.get", json!({}));
    assert_eq!(unchanged, setup);
}

#[test]
fn setup_values_drive_defaults() {
    let mut s = Sidecar::open("timetabled-setup-applied");
    s.ok(
        "setup.update",
        json!({ "section": "attendance", "patch": { "defaultStatus": "absent", "recomputeEnrollmentStats": false } }),
    );
    s.ok(
        "setup.update",
        json!({ "section": "schedule", "patch": { "includeInactiveByDefault": true, "defaultScheduleType": "lab" } }),
    );

    let class_id = s.create_class("BIO150", "lect-9");
    let student = s.create_student("Franklin", "Rosalind");
    s.enroll(&class_id, &student, "enrolled");
    let schedule_id = s.monday_series(&class_id);
    let stored = s.ok("schedules.get", json!({ "scheduleId": schedule_id }));
    assert_eq!(stored["schedule"]["scheduleType"], "lab");

    s.ok(
        "occurrences.toggle",
        json!({ "scheduleId": schedule_id, "date": "2024-09-09", "isActive": false }),
    );
    let listed = s.ok("occurrences.list", json!({ "month": 9, "year": 2024 }));
    assert_eq!(listed["occurrences"].as_array().map(|a| a.len()), Some(5));

    let out = s.ok(
        "attendance.bulkMark",
        json!({
            "classId": class_id,
            "recordedBy": "lect-9",
            "attendanceDate": "2024-09-02",
            "createForAll": true
        }),
    );
    assert_eq!(out["records"][0]["status"], "absent");

    let enrollments = s.ok("enrollments.list", json!({ "classId": class_id }));
    assert_eq!(enrollments["enrollments"][0]["totalSessions"], 0);

    // Another workspace starts from the defaults.
    let mut again = Sidecar::open("timetabled-setup-other");
    let fresh = again.ok("setup.get", json!({}));
    assert_eq!(fresh["attendance"]["defaultStatus"], "present");
}
