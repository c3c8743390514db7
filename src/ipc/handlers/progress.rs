use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok, ErrCode, HandlerErr};
use crate::ipc::helpers::{
    count_completed, load_group, load_member, load_schedule, now_iso, parse_params,
    progress_stats, KIND_GROUP, KIND_INDIVIDUAL,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{CompletionInput, TaskSet};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkDayParams {
    user_id: String,
    schedule_id: Option<String>,
    group_id: Option<String>,
    day_number: i64,
    is_completed: Option<bool>,
    completion_tasks: Option<TaskSet>,
    notes: Option<String>,
    time_spent_minutes: Option<i64>,
}

struct MarkTarget {
    owner_kind: &'static str,
    owner_id: String,
    schedule_name: String,
}

/// Resolves the mark target and runs the access checks: ownership for
/// individual schedules, active membership for groups. Membership-missing
/// and membership-inactive are reported distinctly so the client can offer
/// the right remediation.
fn resolve_mark_target(
    conn: &Connection,
    user_id: &str,
    schedule_id: &Option<String>,
    group_id: &Option<String>,
) -> Result<MarkTarget, HandlerErr> {
    match (schedule_id, group_id) {
        (Some(schedule_id), None) => {
            let row = load_schedule(conn, schedule_id)?
                .ok_or_else(|| HandlerErr::not_found("individual reading schedule not found"))?;
            if row.user_id != user_id {
                return Err(HandlerErr::forbidden(
                    "user does not have access to this reading schedule",
                ));
            }
            Ok(MarkTarget {
                owner_kind: KIND_INDIVIDUAL,
                owner_id: schedule_id.clone(),
                schedule_name: row.template_name,
            })
        }
        (None, Some(group_id)) => {
            let row = load_group(conn, group_id)?
                .ok_or_else(|| HandlerErr::not_found("group reading schedule not found"))?;
            let member = load_member(conn, group_id, user_id)?.ok_or_else(|| {
                HandlerErr::forbidden("user is not a member of this group reading schedule")
            })?;
            if member.status != "active" {
                return Err(HandlerErr::forbidden("user membership is not active"));
            }
            Ok(MarkTarget {
                owner_kind: KIND_GROUP,
                owner_id: group_id.clone(),
                schedule_name: row.template_name,
            })
        }
        (Some(_), Some(_)) => Err(HandlerErr::bad_params(
            "cannot specify both scheduleId and groupId",
        )),
        (None, None) => Err(HandlerErr::bad_params(
            "must specify either scheduleId or groupId",
        )),
    }
}

fn progress_mark_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: MarkDayParams = parse_params(params)?;
    if params.day_number < 1 {
        return Err(HandlerErr::bad_params("dayNumber must be at least 1"));
    }

    // Legacy boolean or task map; normalized once into the canonical shape.
    let input = match (params.completion_tasks, params.is_completed) {
        (Some(tasks), _) => CompletionInput::Tasks(tasks),
        (None, Some(done)) => CompletionInput::Legacy(done),
        (None, None) => {
            return Err(HandlerErr::bad_params(
                "either completionTasks or isCompleted is required",
            ))
        }
    };
    let tasks = input.normalize();
    let completed = tasks.overall_completed();

    let target = resolve_mark_target(conn, &params.user_id, &params.schedule_id, &params.group_id)?;

    let entry_date: Option<String> = conn
        .query_row(
            "SELECT scheduled_date FROM daily_entries
             WHERE owner_kind = ? AND owner_id = ? AND day_number = ?",
            (target.owner_kind, &target.owner_id, params.day_number),
            |r| r.get(0),
        )
        .optional()?;
    let Some(entry_date) = entry_date else {
        return Err(HandlerErr::not_found(format!(
            "Day {} not found in this reading schedule",
            params.day_number
        )));
    };

    // Keep the scheduled date from the prior record when one exists.
    let prior_date: Option<String> = conn
        .query_row(
            "SELECT scheduled_date FROM progress_records
             WHERE owner_kind = ? AND owner_id = ? AND user_id = ? AND day_number = ?",
            (
                target.owner_kind,
                &target.owner_id,
                &params.user_id,
                params.day_number,
            ),
            |r| r.get(0),
        )
        .optional()?;
    let scheduled_date = prior_date.unwrap_or(entry_date);

    let now = now_iso();
    let completed_at = completed.then(|| now.clone());
    let notes = if completed { params.notes.clone() } else { None };
    let time_spent = if completed {
        params.time_spent_minutes
    } else {
        None
    };

    conn.execute(
        "INSERT INTO progress_records(
            id, owner_kind, owner_id, user_id, day_number,
            task_verse_text, task_footnotes, task_partner, is_completed,
            completed_at, notes, time_spent_minutes, scheduled_date, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(owner_kind, owner_id, user_id, day_number) DO UPDATE SET
           task_verse_text = excluded.task_verse_text,
           task_footnotes = excluded.task_footnotes,
           task_partner = excluded.task_partner,
           is_completed = excluded.is_completed,
           completed_at = excluded.completed_at,
           notes = excluded.notes,
           time_spent_minutes = excluded.time_spent_minutes,
           scheduled_date = excluded.scheduled_date,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            target.owner_kind,
            &target.owner_id,
            &params.user_id,
            params.day_number,
            tasks.verse_text as i64,
            tasks.footnotes as i64,
            tasks.partner as i64,
            completed as i64,
            &completed_at,
            &notes,
            time_spent,
            &scheduled_date,
            &now,
        ),
    )?;

    // Best-effort counter refresh: failures are logged and swallowed, the
    // mark itself has already succeeded.
    if let Err(e) = update_progress_counters(conn, &target, &params.user_id, params.day_number) {
        tracing::warn!(
            "failed to update progress counters for {} {}: {}",
            target.owner_kind,
            target.owner_id,
            e.message
        );
    }

    Ok(json!({
        "progress": {
            "dayNumber": params.day_number,
            "completionTasks": tasks,
            "isCompleted": completed,
            "completedAt": completed_at,
            "notes": notes,
            "timeSpentMinutes": time_spent,
            "scheduledDate": scheduled_date,
            "scheduleName": target.schedule_name
        }
    }))
}

fn update_progress_counters(
    conn: &Connection,
    target: &MarkTarget,
    user_id: &str,
    day_number: i64,
) -> Result<(), HandlerErr> {
    let completed_days = count_completed(conn, target.owner_kind, &target.owner_id, user_id)?;
    let now = now_iso();

    if target.owner_kind == KIND_INDIVIDUAL {
        conn.execute(
            "UPDATE schedules
             SET current_day = MAX(?, current_day),
                 completed_days = ?,
                 updated_at = ?
             WHERE id = ?",
            (day_number, completed_days, &now, &target.owner_id),
        )?;
    } else {
        conn.execute(
            "UPDATE group_members
             SET current_day = MAX(?, current_day),
                 completed_days = ?,
                 last_active_at = ?
             WHERE group_id = ? AND user_id = ?",
            (day_number, completed_days, &now, &target.owner_id, user_id),
        )?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetProgressParams {
    user_id: String,
    schedule_id: Option<String>,
    group_id: Option<String>,
}

fn progress_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: GetProgressParams = parse_params(params)?;
    let target = resolve_mark_target(conn, &params.user_id, &params.schedule_id, &params.group_id)?;

    let mut stmt = conn.prepare(
        "SELECT day_number, task_verse_text, task_footnotes, task_partner, is_completed,
                completed_at, notes, time_spent_minutes, scheduled_date, updated_at
         FROM progress_records
         WHERE owner_kind = ? AND owner_id = ? AND user_id = ?
         ORDER BY day_number",
    )?;
    let records = stmt
        .query_map((target.owner_kind, &target.owner_id, &params.user_id), |r| {
            let verse_text: Option<i64> = r.get(1)?;
            let footnotes: Option<i64> = r.get(2)?;
            let partner: Option<i64> = r.get(3)?;
            let tasks = verse_text.map(|v| TaskSet {
                verse_text: v != 0,
                footnotes: footnotes.unwrap_or(0) != 0,
                partner: partner.unwrap_or(0) != 0,
            });
            Ok(json!({
                "dayNumber": r.get::<_, i64>(0)?,
                "completionTasks": tasks,
                "isCompleted": r.get::<_, i64>(4)? != 0,
                "completedAt": r.get::<_, Option<String>>(5)?,
                "notes": r.get::<_, Option<String>>(6)?,
                "timeSpentMinutes": r.get::<_, Option<i64>>(7)?,
                "scheduledDate": r.get::<_, Option<String>>(8)?,
                "updatedAt": r.get::<_, String>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let stats = progress_stats(conn, target.owner_kind, &target.owner_id, &params.user_id)?;

    Ok(json!({
        "userId": params.user_id,
        "scheduleId": params.schedule_id,
        "groupId": params.group_id,
        "isGroupSchedule": target.owner_kind == KIND_GROUP,
        "progress": {
            "totalProgressRecords": stats.records,
            "completedReadings": stats.completed,
            "pointsEarned": stats.points
        },
        "dailyProgress": records
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
        "progress.markDay" => Some(run(progress_mark_day, state, req)),
        "progress.get" => Some(run(progress_get, state, req)),
        _ => None,
    }
}
