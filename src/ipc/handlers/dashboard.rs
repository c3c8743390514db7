use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::ipc::error::{err, ok, ErrCode, HandlerErr};
use crate::ipc::helpers::{
    active_member_count, list_schedules_for_user, parse_params, progress_stats, require_date,
    today, KIND_GROUP, KIND_INDIVIDUAL,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSchedulesParams {
    user_id: String,
    #[serde(default)]
    include_inactive: bool,
}

/// A merged view of everything the user is reading: their individual
/// schedules plus every group membership, newest first. Individual rows
/// compute completion live from progress records; group rows report the
/// member's cached completed-day counter, which the mark path refreshes.
fn dashboard_user_schedules(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: UserSchedulesParams = parse_params(params)?;

    let mut merged: Vec<(String, serde_json::Value)> = Vec::new();

    let schedules = list_schedules_for_user(conn, &params.user_id, !params.include_inactive)?;
    let mut individual_count = 0usize;
    for row in &schedules {
        let stats = progress_stats(conn, KIND_INDIVIDUAL, &row.id, &params.user_id)?;
        let start = require_date("startDate", &row.start_date)?;
        let current = schedule::current_day(start, today(), row.duration_days);
        let pct = schedule::completion_percentage(stats.completed, row.duration_days);
        individual_count += 1;
        merged.push((
            row.created_at.clone(),
            json!({
                "type": "individual",
                "scheduleId": row.id,
                "scheduleName": row.template_name,
                "templateId": row.template_id,
                "startDate": row.start_date,
                "endDate": row.end_date,
                "durationDays": row.duration_days,
                "currentDay": current,
                "status": row.status,
                "completionTasks": row.tasks,
                "progress": {
                    "totalReadings": row.duration_days,
                    "completedReadings": stats.completed,
                    "completionPercentage": pct,
                    "pointsEarned": stats.points
                },
                "createdAt": row.created_at
            }),
        ));
    }

    let status_filter = if params.include_inactive {
        ""
    } else {
        " AND m.status = 'active'"
    };
    let sql = format!(
        "SELECT g.id, g.name, g.template_id, g.template_name, g.start_date, g.end_date,
                g.duration_days, g.status, g.max_members,
                g.task_verse_text, g.task_footnotes, g.task_partner,
                m.role, m.status, m.joined_at, m.current_day, m.completed_days
         FROM group_members m
         JOIN reading_groups g ON g.id = m.group_id
         WHERE m.user_id = ?{status_filter}
         ORDER BY m.joined_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let memberships = stmt
        .query_map([&params.user_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, Option<i64>>(8)?,
                (
                    r.get::<_, i64>(9)? != 0,
                    r.get::<_, i64>(10)? != 0,
                    r.get::<_, i64>(11)? != 0,
                ),
                r.get::<_, String>(12)?,
                r.get::<_, String>(13)?,
                r.get::<_, String>(14)?,
                r.get::<_, i64>(15)?,
                r.get::<_, i64>(16)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut group_count = 0usize;
    for (
        group_id,
        group_name,
        template_id,
        template_name,
        start_date,
        end_date,
        duration_days,
        group_status,
        max_members,
        (verse_text, footnotes, partner),
        role,
        member_status,
        joined_at,
        _member_current_day,
        completed_days,
    ) in memberships
    {
        let stats = progress_stats(conn, KIND_GROUP, &group_id, &params.user_id)?;
        let member_count = active_member_count(conn, &group_id)?;
        let start = require_date("startDate", &start_date)?;
        let current = schedule::current_day(start, today(), duration_days);
        let pct = schedule::completion_percentage(completed_days, duration_days);
        group_count += 1;
        merged.push((
            joined_at.clone(),
            json!({
                "type": "group",
                "groupId": group_id,
                "groupName": group_name,
                "scheduleName": template_name,
                "templateId": template_id,
                "startDate": start_date,
                "endDate": end_date,
                "durationDays": duration_days,
                "currentDay": current,
                "status": group_status,
                "memberCount": member_count,
                "maxMembers": max_members,
                "completionTasks": {
                    "verseText": verse_text,
                    "footnotes": footnotes,
                    "partner": partner
                },
                "membership": {
                    "role": role,
                    "status": member_status,
                    "joinedAt": joined_at
                },
                "progress": {
                    "totalReadings": duration_days,
                    "completedReadings": completed_days,
                    "completionPercentage": pct,
                    "pointsEarned": stats.points
                },
                "joinedAt": joined_at
            }),
        ));
    }

    // Most recent first across both kinds; the timestamps are ISO strings,
    // so a plain string sort orders them correctly.
    merged.sort_by(|a, b| b.0.cmp(&a.0));
    let all: Vec<serde_json::Value> = merged.into_iter().map(|(_, v)| v).collect();

    Ok(json!({
        "userId": params.user_id,
        "allSchedules": all,
        "summary": {
            "totalSchedules": individual_count + group_count,
            "individualSchedules": individual_count,
            "groupSchedules": group_count
        }
    }))
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
        "dashboard.userSchedules" => Some(run(dashboard_user_schedules, state, req)),
        _ => None,
    }
}
