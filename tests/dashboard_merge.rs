mod test_support;

use serde_json::json;
use test_support::{request_ok, seed_template, spawn_sidecar, temp_workspace};

#[test]
fn dashboard_merges_individual_and_group_schedules() {
    let workspace = temp_workspace("lectiond-dashboard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    seed_template(&mut stdin, &mut reader, "2", "dash-plan", 10);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedules.create",
        json!({
            "userId": "dana",
            "templateId": "dash-plan",
            "startDate": "2024-01-01"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.create",
        json!({
            "groupName": "Dash Group",
            "templateId": "dash-plan",
            "startDate": "2024-01-01",
            "createdBy": "dana"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "groups.join",
        json!({ "userId": "erin", "groupId": "dash-group" }),
    );

    // Two completed days on the individual schedule.
    for (id, day) in [("6", 1), ("7", 2)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "progress.markDay",
            json!({
                "userId": "dana",
                "scheduleId": "dana_dash-plan_2024-01-01",
                "dayNumber": day,
                "isCompleted": true
            }),
        );
    }
    // One completed day in the group.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "progress.markDay",
        json!({
            "userId": "dana",
            "groupId": "dash-group",
            "dayNumber": 1,
            "isCompleted": true
        }),
    );

    let dash = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "dashboard.userSchedules",
        json!({ "userId": "dana" }),
    );

    let summary = dash.get("summary").expect("summary");
    assert_eq!(summary.get("totalSchedules").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        summary.get("individualSchedules").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(summary.get("groupSchedules").and_then(|v| v.as_i64()), Some(1));

    let all = dash
        .get("allSchedules")
        .and_then(|v| v.as_array())
        .expect("allSchedules");
    assert_eq!(all.len(), 2);

    let individual = all
        .iter()
        .find(|s| s.get("type").and_then(|v| v.as_str()) == Some("individual"))
        .expect("individual entry");
    assert_eq!(
        individual
            .get("progress")
            .and_then(|p| p.get("completedReadings"))
            .and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        individual
            .get("progress")
            .and_then(|p| p.get("completionPercentage"))
            .and_then(|v| v.as_i64()),
        Some(20)
    );

    let group = all
        .iter()
        .find(|s| s.get("type").and_then(|v| v.as_str()) == Some("group"))
        .expect("group entry");
    assert_eq!(
        group.get("memberCount").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        group
            .get("progress")
            .and_then(|p| p.get("completedReadings"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        group
            .get("membership")
            .and_then(|m| m.get("role"))
            .and_then(|v| v.as_str()),
        Some("admin")
    );

    // Erin only belongs to the group.
    let erin = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "dashboard.userSchedules",
        json!({ "userId": "erin" }),
    );
    assert_eq!(
        erin.get("summary")
            .and_then(|s| s.get("totalSchedules"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn inactive_memberships_appear_only_on_request() {
    let workspace = temp_workspace("lectiond-dashboard-inactive");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    seed_template(&mut stdin, &mut reader, "2", "inactive-plan", 7);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({
            "groupName": "Leavers",
            "templateId": "inactive-plan",
            "startDate": "2024-01-01",
            "createdBy": "alice"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.join",
        json!({ "userId": "bob", "groupId": "leavers" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "groups.leave",
        json!({ "userId": "bob", "groupId": "leavers" }),
    );

    let default_view = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "dashboard.userSchedules",
        json!({ "userId": "bob" }),
    );
    assert_eq!(
        default_view
            .get("summary")
            .and_then(|s| s.get("totalSchedules"))
            .and_then(|v| v.as_i64()),
        Some(0)
    );

    let full_view = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "dashboard.userSchedules",
        json!({ "userId": "bob", "includeInactive": true }),
    );
    assert_eq!(
        full_view
            .get("summary")
            .and_then(|s| s.get("totalSchedules"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );
    let entry = full_view
        .get("allSchedules")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .expect("entry");
    assert_eq!(
        entry
            .get("membership")
            .and_then(|m| m.get("status"))
            .and_then(|v| v.as_str()),
        Some("left")
    );

    drop(stdin);
    let _ = child.wait();
}
