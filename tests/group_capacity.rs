mod test_support;

use chrono::{Duration, Utc};
use serde_json::json;
use test_support::{error_code, request, request_ok, seed_template, spawn_sidecar, temp_workspace};

#[test]
fn capacity_is_enforced_against_live_active_membership() {
    let workspace = temp_workspace("lectiond-capacity");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    seed_template(&mut stdin, &mut reader, "2", "cap-plan", 30);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({
            "groupName": "Tiny Group",
            "templateId": "cap-plan",
            "startDate": "2024-01-01",
            "createdBy": "alice",
            "maxMembers": 2
        }),
    );

    // Creator counts toward capacity, so one seat remains.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.join",
        json!({ "userId": "bob", "groupId": "tiny-group" }),
    );
    let full = request(
        &mut stdin,
        &mut reader,
        "5",
        "groups.join",
        json!({ "userId": "carol", "groupId": "tiny-group" }),
    );
    assert_eq!(error_code(&full), "capacity_exceeded");

    // A leave frees the seat for the next joiner.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "groups.leave",
        json!({ "userId": "bob", "groupId": "tiny-group" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "groups.join",
        json!({ "userId": "carol", "groupId": "tiny-group" }),
    );

    // Rejoin reactivates the old membership without a capacity check,
    // so the group can briefly run over its limit.
    let rejoined = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "groups.join",
        json!({ "userId": "bob", "groupId": "tiny-group" }),
    );
    assert_eq!(
        rejoined.get("rejoined").and_then(|v| v.as_bool()),
        Some(true)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn late_joiner_starts_on_the_group_current_day() {
    let workspace = temp_workspace("lectiond-late-join");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    seed_template(&mut stdin, &mut reader, "2", "late-plan", 30);

    // The group started ten days ago, so today is day 11.
    let start = (Utc::now().date_naive() - Duration::days(10))
        .format("%Y-%m-%d")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({
            "groupName": "Running Group",
            "templateId": "late-plan",
            "startDate": start,
            "createdBy": "alice"
        }),
    );

    let joined = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.join",
        json!({ "userId": "bob", "groupId": "running-group" }),
    );
    assert_eq!(
        joined
            .get("group")
            .and_then(|g| g.get("currentDay"))
            .and_then(|v| v.as_i64()),
        Some(11)
    );

    // The days already behind the joiner get incomplete placeholder records.
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "progress.get",
        json!({ "userId": "bob", "groupId": "running-group" }),
    );
    assert_eq!(
        progress
            .get("progress")
            .and_then(|p| p.get("totalProgressRecords"))
            .and_then(|v| v.as_i64()),
        Some(11)
    );
    assert_eq!(
        progress
            .get("progress")
            .and_then(|p| p.get("completedReadings"))
            .and_then(|v| v.as_i64()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn joiner_before_start_and_after_end_is_clamped() {
    let workspace = temp_workspace("lectiond-clamp");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    seed_template(&mut stdin, &mut reader, "2", "clamp-plan", 5);

    // Starts next week: a joiner today begins on day 1.
    let future = (Utc::now().date_naive() + Duration::days(7))
        .format("%Y-%m-%d")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({
            "groupName": "Future Group",
            "templateId": "clamp-plan",
            "startDate": future,
            "createdBy": "alice"
        }),
    );
    let early = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.join",
        json!({ "userId": "bob", "groupId": "future-group" }),
    );
    assert_eq!(
        early
            .get("group")
            .and_then(|g| g.get("currentDay"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    // Ended long ago: the day is clamped to the duration, never past it.
    let past = (Utc::now().date_naive() - Duration::days(100))
        .format("%Y-%m-%d")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "groups.create",
        json!({
            "groupName": "Finished Group",
            "templateId": "clamp-plan",
            "startDate": past,
            "createdBy": "alice"
        }),
    );
    let late = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "groups.join",
        json!({ "userId": "bob", "groupId": "finished-group" }),
    );
    assert_eq!(
        late.get("group")
            .and_then(|g| g.get("currentDay"))
            .and_then(|v| v.as_i64()),
        Some(5)
    );

    drop(stdin);
    let _ = child.wait();
}
