use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok, ErrCode, HandlerErr};
use crate::ipc::helpers::{
    active_admin_count, active_member_count, list_members, list_public_active_groups, load_group,
    load_member, materialize_daily_entries, now_iso, parse_params, require_date,
    resolve_template, today, MaterializeMode, GroupRow, MemberRow, KIND_GROUP, WRITE_BATCH_SIZE,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, TaskSet};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupParams {
    group_name: String,
    template_id: String,
    start_date: String,
    created_by: String,
    #[serde(default = "default_true")]
    is_public: bool,
    max_members: Option<i64>,
    custom_group_id: Option<String>,
    completion_tasks: Option<TaskSet>,
}

fn default_true() -> bool {
    true
}

fn groups_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: CreateGroupParams = parse_params(params)?;
    let start = require_date("startDate", &params.start_date)?;
    let name = params.group_name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("groupName must not be empty"));
    }
    if let Some(max) = params.max_members {
        if max < 1 {
            return Err(HandlerErr::bad_params("maxMembers must be positive"));
        }
    }
    let tasks = params.completion_tasks.unwrap_or_else(TaskSet::default_config);
    if !tasks.any_enabled() {
        return Err(HandlerErr::invalid_state(
            "completionTasks must enable at least one task",
        ));
    }

    let (meta, units) = resolve_template(conn, &params.template_id)?;

    let group_id = match &params.custom_group_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => schedule::group_slug(&name),
    };
    if group_id.is_empty() {
        return Err(HandlerErr::bad_params(
            "group id could not be derived from group name",
        ));
    }

    if load_group(conn, &group_id)?.is_some() {
        return Err(HandlerErr::conflict(
            "group id already exists; choose a different group name or provide a custom group id",
        )
        .with_details(json!({
            "suggestedGroupId": format!("{}-{}", group_id, Utc::now().timestamp_millis())
        })));
    }

    let end = schedule::end_date(start, meta.duration_days);
    let now = now_iso();
    conn.execute(
        "INSERT INTO reading_groups(id, name, template_id, template_name, start_date, end_date,
                                    duration_days, current_day, status, created_by, is_public,
                                    max_members, task_verse_text, task_footnotes, task_partner,
                                    created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, 'active', ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &group_id,
            &name,
            &params.template_id,
            &meta.name,
            &params.start_date,
            schedule::format_date(end),
            meta.duration_days,
            &params.created_by,
            params.is_public as i64,
            params.max_members,
            tasks.verse_text as i64,
            tasks.footnotes as i64,
            tasks.partner as i64,
            &now,
            &now,
        ),
    )?;

    // The creator is the first member and the group's admin.
    conn.execute(
        "INSERT INTO group_members(group_id, user_id, role, status, joined_at,
                                   current_day, completed_days, last_active_at)
         VALUES(?, ?, 'admin', 'active', ?, 1, 0, ?)",
        (&group_id, &params.created_by, &now, &now),
    )?;

    let written = materialize_daily_entries(
        conn,
        KIND_GROUP,
        &group_id,
        start,
        &units,
        MaterializeMode::Overwrite,
    )?;

    Ok(json!({
        "group": {
            "groupId": group_id,
            "groupName": name,
            "templateId": params.template_id,
            "templateName": meta.name,
            "startDate": params.start_date,
            "endDate": schedule::format_date(end),
            "durationDays": meta.duration_days,
            "totalDailyReadings": written,
            "status": "active",
            "createdBy": params.created_by,
            "isPublic": params.is_public,
            "maxMembers": params.max_members,
            "completionTasks": tasks
        }
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinGroupParams {
    user_id: String,
    group_id: String,
    user_name: Option<String>,
    email: Option<String>,
}

fn groups_join(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: JoinGroupParams = parse_params(params)?;

    let group = load_group(conn, &params.group_id)?
        .ok_or_else(|| HandlerErr::not_found("group reading schedule not found"))?;
    if group.status != "active" {
        return Err(HandlerErr::invalid_state(format!(
            "cannot join group: group status is {}",
            group.status
        )));
    }
    if !group.is_public {
        return Err(HandlerErr::invalid_state("group is not public"));
    }

    let now = now_iso();

    if let Some(member) = load_member(conn, &params.group_id, &params.user_id)? {
        if member.status == "active" {
            return Err(HandlerErr::conflict(
                "user is already an active member of this group",
            )
            .with_details(json!({
                "memberInfo": {
                    "joinedAt": member.joined_at,
                    "role": member.role,
                    "currentDay": member.current_day,
                    "completedDays": member.completed_days
                }
            })));
        }

        // Rejoin: reactivate without re-running the capacity check.
        conn.execute(
            "UPDATE group_members
             SET status = 'active', rejoined_at = ?, last_active_at = ?
             WHERE group_id = ? AND user_id = ?",
            (&now, &now, &params.group_id, &params.user_id),
        )?;
        conn.execute(
            "UPDATE reading_groups SET updated_at = ? WHERE id = ?",
            (&now, &params.group_id),
        )?;

        return Ok(json!({
            "rejoined": true,
            "group": {
                "groupId": group.id,
                "groupName": group.name,
                "templateName": group.template_name,
                "startDate": group.start_date,
                "endDate": group.end_date,
                "durationDays": group.duration_days,
                "currentDay": member.current_day,
                "memberRole": member.role
            }
        }));
    }

    // Capacity is a live count of active memberships, never a cached field.
    if let Some(max) = group.max_members {
        let active = active_member_count(conn, &params.group_id)?;
        if active >= max {
            return Err(HandlerErr::capacity_exceeded(format!(
                "group is full: maximum members is {max}"
            )));
        }
    }

    // A late joiner starts on the day the group has reached, not day 1.
    let start = require_date("startDate", &group.start_date)?;
    let current_day = schedule::current_day(start, today(), group.duration_days);

    conn.execute(
        "INSERT INTO group_members(group_id, user_id, user_name, email, role, status,
                                   joined_at, current_day, completed_days, last_active_at)
         VALUES(?, ?, ?, ?, 'member', 'active', ?, ?, 0, ?)",
        (
            &params.group_id,
            &params.user_id,
            &params.user_name,
            &params.email,
            &now,
            current_day,
            &now,
        ),
    )?;
    conn.execute(
        "UPDATE reading_groups SET updated_at = ? WHERE id = ?",
        (&now, &params.group_id),
    )?;

    // Pre-seed incomplete placeholders for the days already behind the joiner.
    seed_progress_placeholders(conn, &group, &params.user_id, current_day, &now)?;

    let total_members = active_member_count(conn, &params.group_id)?;

    Ok(json!({
        "rejoined": false,
        "group": {
            "groupId": group.id,
            "groupName": group.name,
            "templateName": group.template_name,
            "startDate": group.start_date,
            "endDate": group.end_date,
            "durationDays": group.duration_days,
            "currentDay": current_day,
            "memberRole": "member",
            "totalMembers": total_members
        }
    }))
}

fn seed_progress_placeholders(
    conn: &Connection,
    group: &GroupRow,
    user_id: &str,
    through_day: i64,
    now: &str,
) -> Result<(), HandlerErr> {
    let start = require_date("startDate", &group.start_date)?;
    let days: Vec<i64> = (1..=through_day).collect();
    for chunk in days.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.unchecked_transaction()?;
        for day in chunk {
            let date = schedule::scheduled_date(start, *day);
            tx.execute(
                "INSERT OR IGNORE INTO progress_records(
                    id, owner_kind, owner_id, user_id, day_number,
                    is_completed, scheduled_date, updated_at)
                 VALUES(?, ?, ?, ?, ?, 0, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    KIND_GROUP,
                    &group.id,
                    user_id,
                    day,
                    schedule::format_date(date),
                    now,
                ),
            )?;
        }
        tx.commit()?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaveGroupParams {
    user_id: String,
    group_id: String,
}

fn groups_leave(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: LeaveGroupParams = parse_params(params)?;

    load_group(conn, &params.group_id)?
        .ok_or_else(|| HandlerErr::not_found("group reading schedule not found"))?;
    let member = load_member(conn, &params.group_id, &params.user_id)?
        .ok_or_else(|| HandlerErr::not_found("user is not a member of this group"))?;
    if member.status != "active" {
        return Err(HandlerErr::invalid_state("membership is not active"));
    }

    // The last active admin cannot walk away from the group.
    if member.role == "admin" && active_admin_count(conn, &params.group_id)? <= 1 {
        return Err(HandlerErr::invalid_state(
            "cannot leave group: you are the only active admin; promote another admin first",
        ));
    }

    let now = now_iso();
    conn.execute(
        "UPDATE group_members
         SET status = 'left', left_at = ?, last_active_at = ?
         WHERE group_id = ? AND user_id = ?",
        (&now, &now, &params.group_id, &params.user_id),
    )?;
    conn.execute(
        "UPDATE reading_groups SET updated_at = ? WHERE id = ?",
        (&now, &params.group_id),
    )?;

    Ok(json!({ "left": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteMemberParams {
    group_id: String,
    acting_user_id: String,
    user_id: String,
}

fn groups_promote(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: PromoteMemberParams = parse_params(params)?;

    load_group(conn, &params.group_id)?
        .ok_or_else(|| HandlerErr::not_found("group reading schedule not found"))?;

    let acting = load_member(conn, &params.group_id, &params.acting_user_id)?
        .ok_or_else(|| HandlerErr::forbidden("acting user is not a member of this group"))?;
    if acting.status != "active" || acting.role != "admin" {
        return Err(HandlerErr::forbidden(
            "only an active admin can promote members",
        ));
    }

    let target = load_member(conn, &params.group_id, &params.user_id)?
        .ok_or_else(|| HandlerErr::not_found("user is not a member of this group"))?;
    if target.status != "active" {
        return Err(HandlerErr::invalid_state("member is not active"));
    }

    if target.role != "admin" {
        conn.execute(
            "UPDATE group_members SET role = 'admin' WHERE group_id = ? AND user_id = ?",
            (&params.group_id, &params.user_id),
        )?;
    }

    Ok(json!({ "userId": params.user_id, "role": "admin" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupMembersParams {
    group_id: String,
    #[serde(default)]
    include_inactive: bool,
}

fn member_json(m: &MemberRow) -> serde_json::Value {
    json!({
        "userId": m.user_id,
        "userName": m.user_name,
        "email": m.email,
        "role": m.role,
        "status": m.status,
        "joinedAt": m.joined_at,
        "leftAt": m.left_at,
        "rejoinedAt": m.rejoined_at,
        "currentDay": m.current_day,
        "completedDays": m.completed_days,
        "lastActiveAt": m.last_active_at
    })
}

fn groups_members(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: GroupMembersParams = parse_params(params)?;

    let group = load_group(conn, &params.group_id)?
        .ok_or_else(|| HandlerErr::not_found("group reading schedule not found"))?;
    let members = list_members(conn, &params.group_id, !params.include_inactive)?;

    let active = members.iter().filter(|m| m.status == "active").count();
    let admins = members
        .iter()
        .filter(|m| m.role == "admin" && m.status == "active")
        .count();
    let members_json: Vec<serde_json::Value> = members.iter().map(member_json).collect();

    Ok(json!({
        "group": {
            "groupId": group.id,
            "groupName": group.name,
            "templateName": group.template_name,
            "startDate": group.start_date,
            "endDate": group.end_date,
            "currentDay": group.current_day,
            "status": group.status,
            "createdBy": group.created_by,
            "isPublic": group.is_public,
            "maxMembers": group.max_members
        },
        "members": members_json,
        "totalMembers": members_json.len(),
        "activeMembers": active,
        "admins": admins
    }))
}

fn groups_available(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let groups = list_public_active_groups(conn)?;

    let mut out = Vec::with_capacity(groups.len());
    for g in &groups {
        let member_count = active_member_count(conn, &g.id)?;
        let is_full = g.max_members.is_some_and(|max| member_count >= max);
        out.push(json!({
            "groupId": g.id,
            "groupName": g.name,
            "templateId": g.template_id,
            "templateName": g.template_name,
            "startDate": g.start_date,
            "endDate": g.end_date,
            "durationDays": g.duration_days,
            "currentDay": g.current_day,
            "status": g.status,
            "createdBy": g.created_by,
            "createdAt": g.created_at,
            "isPublic": g.is_public,
            "maxMembers": g.max_members,
            "memberCount": member_count,
            "isFull": is_full,
            "completionTasks": g.tasks
        }));
    }

    let total = out.len();
    Ok(json!({ "groups": out, "total": total }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
               state: &AppState,
               req: &Request| {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, ErrCode::NoWorkspace.as_str(), "select a workspace first", None);
        };
        match f(conn, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        }
    };

    match req.method.as_str() {
        "groups.create" => Some(run(groups_create, state, req)),
        "groups.join" => Some(run(groups_join, state, req)),
        "groups.leave" => Some(run(groups_leave, state, req)),
        "groups.promote" => Some(run(groups_promote, state, req)),
        "groups.members" => Some(run(groups_members, state, req)),
        "groups.available" => Some(run(|conn, _| groups_available(conn), state, req)),
        _ => None,
    }
}
