use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::ipc::error::{err, ok, ErrCode, HandlerErr};
use crate::ipc::helpers::{
    load_group, load_schedule, materialize_daily_entries, now_iso, parse_params, require_date,
    resolve_template, today, MaterializeMode, KIND_GROUP, KIND_INDIVIDUAL,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, TaskSet};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateScheduleParams {
    user_id: String,
    template_id: String,
    start_date: String,
    completion_tasks: Option<TaskSet>,
}

fn schedules_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: CreateScheduleParams = parse_params(params)?;
    let start = require_date("startDate", &params.start_date)?;
    let tasks = params.completion_tasks.unwrap_or_else(TaskSet::default_config);
    if !tasks.any_enabled() {
        return Err(HandlerErr::invalid_state(
            "completionTasks must enable at least one task",
        ));
    }

    let (meta, units) = resolve_template(conn, &params.template_id)?;

    // Deterministic composite id doubles as the idempotency/conflict key.
    let schedule_id = format!(
        "{}_{}_{}",
        params.user_id, params.template_id, params.start_date
    );
    let existing: Option<i64> = conn
        .query_row("SELECT 1 FROM schedules WHERE id = ?", [&schedule_id], |r| {
            r.get(0)
        })
        .optional()?;
    if existing.is_some() {
        return Err(HandlerErr::conflict(
            "reading schedule already exists for this user, template, and start date",
        )
        .with_details(json!({ "scheduleId": schedule_id })));
    }

    let end = schedule::end_date(start, meta.duration_days);
    let now = now_iso();
    conn.execute(
        "INSERT INTO schedules(id, user_id, template_id, template_name, start_date, end_date,
                               duration_days, current_day, completed_days, status,
                               task_verse_text, task_footnotes, task_partner,
                               created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, 0, 'active', ?, ?, ?, ?, ?)",
        (
            &schedule_id,
            &params.user_id,
            &params.template_id,
            &meta.name,
            &params.start_date,
            schedule::format_date(end),
            meta.duration_days,
            tasks.verse_text as i64,
            tasks.footnotes as i64,
            tasks.partner as i64,
            &now,
            &now,
        ),
    )?;

    let written = materialize_daily_entries(
        conn,
        KIND_INDIVIDUAL,
        &schedule_id,
        start,
        &units,
        MaterializeMode::Overwrite,
    )?;

    Ok(json!({
        "schedule": {
            "scheduleId": schedule_id,
            "userId": params.user_id,
            "templateId": params.template_id,
            "templateName": meta.name,
            "startDate": params.start_date,
            "endDate": schedule::format_date(end),
            "durationDays": meta.duration_days,
            "totalDailyReadings": written,
            "status": "active",
            "completionTasks": tasks
        }
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleTargetParams {
    schedule_id: Option<String>,
    group_id: Option<String>,
}

enum Target {
    Individual(String),
    Group(String),
}

impl ScheduleTargetParams {
    fn target(self) -> Result<Target, HandlerErr> {
        match (self.schedule_id, self.group_id) {
            (Some(s), None) => Ok(Target::Individual(s)),
            (None, Some(g)) => Ok(Target::Group(g)),
            (Some(_), Some(_)) => Err(HandlerErr::bad_params(
                "cannot specify both scheduleId and groupId",
            )),
            (None, None) => Err(HandlerErr::bad_params(
                "must specify either scheduleId or groupId",
            )),
        }
    }
}

fn load_entries(
    conn: &Connection,
    owner_kind: &str,
    owner_id: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT day_number, scheduled_date, day_of_week, start_book_id, start_book_name,
                end_book_id, end_book_name, portions, raw_reading
         FROM daily_entries
         WHERE owner_kind = ? AND owner_id = ?
         ORDER BY day_number",
    )?;
    let readings = stmt
        .query_map((owner_kind, owner_id), |r| {
            let portions_raw: String = r.get(7)?;
            let raw_reading: Option<String> = r.get(8)?;
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
                portions_raw,
                raw_reading,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
        .into_iter()
        .map(
            |(day, date, dow, sb_id, sb_name, eb_id, eb_name, portions_raw, raw_reading)| {
                let portions: serde_json::Value =
                    serde_json::from_str(&portions_raw).unwrap_or(serde_json::Value::Null);
                let mut reading = json!({
                    "dayNumber": day,
                    "scheduledDate": date,
                    "dayOfWeek": dow,
                    "startBookId": sb_id,
                    "startBookName": sb_name,
                    "endBookId": eb_id,
                    "endBookName": eb_name,
                    "portions": portions
                });
                if let Some(raw) = raw_reading {
                    reading["rawReading"] = json!(raw);
                }
                reading
            },
        )
        .collect();
    Ok(readings)
}

fn schedules_info(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: ScheduleTargetParams = parse_params(params)?;
    let target = params.target()?;

    let (schedule_meta, owner_kind, owner_id) = match &target {
        Target::Individual(schedule_id) => {
            let row = load_schedule(conn, schedule_id)?.ok_or_else(|| {
                HandlerErr::not_found("individual reading schedule not found")
            })?;
            let start = require_date("startDate", &row.start_date)?;
            let current = schedule::current_day(start, today(), row.duration_days);
            let meta = json!({
                "scheduleId": row.id,
                "groupId": null,
                "scheduleName": row.template_name,
                "groupName": null,
                "startDate": row.start_date,
                "endDate": row.end_date,
                "durationDays": row.duration_days,
                "currentDay": current,
                "status": row.status,
                "isGroupSchedule": false,
                "completionTasks": row.tasks,
                "createdAt": row.created_at,
                "updatedAt": row.updated_at
            });
            (meta, KIND_INDIVIDUAL, schedule_id.clone())
        }
        Target::Group(group_id) => {
            let row = load_group(conn, group_id)?
                .ok_or_else(|| HandlerErr::not_found("group reading schedule not found"))?;
            let start = require_date("startDate", &row.start_date)?;
            let current = schedule::current_day(start, today(), row.duration_days);
            let meta = json!({
                "scheduleId": null,
                "groupId": row.id,
                "scheduleName": row.template_name,
                "groupName": row.name,
                "startDate": row.start_date,
                "endDate": row.end_date,
                "durationDays": row.duration_days,
                "currentDay": current,
                "status": row.status,
                "isGroupSchedule": true,
                "completionTasks": row.tasks,
                "createdAt": row.created_at,
                "updatedAt": row.updated_at
            });
            (meta, KIND_GROUP, group_id.clone())
        }
    };

    let readings = load_entries(conn, owner_kind, &owner_id)?;
    if readings.is_empty() {
        return Err(HandlerErr::not_found(
            "no daily readings found for this schedule",
        ));
    }

    Ok(json!({ "schedule": schedule_meta, "readings": readings }))
}

/// Fills in daily entries missing after a crash mid-materialization.
/// Existing entries are never touched, so re-running is always safe.
fn schedules_repair_entries(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: ScheduleTargetParams = parse_params(params)?;
    let target = params.target()?;

    let (owner_kind, owner_id, template_id, start_date) = match target {
        Target::Individual(schedule_id) => {
            let row = load_schedule(conn, &schedule_id)?.ok_or_else(|| {
                HandlerErr::not_found("individual reading schedule not found")
            })?;
            (KIND_INDIVIDUAL, schedule_id, row.template_id, row.start_date)
        }
        Target::Group(group_id) => {
            let row = load_group(conn, &group_id)?
                .ok_or_else(|| HandlerErr::not_found("group reading schedule not found"))?;
            (KIND_GROUP, group_id, row.template_id, row.start_date)
        }
    };

    let start = require_date("startDate", &start_date)?;
    let (_, units) = resolve_template(conn, &template_id)?;
    let filled = materialize_daily_entries(
        conn,
        owner_kind,
        &owner_id,
        start,
        &units,
        MaterializeMode::FillMissing,
    )?;

    Ok(json!({
        "filledEntries": filled,
        "totalUnits": units.len()
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
        "schedules.create" => Some(run(schedules_create, state, req)),
        "schedules.info" => Some(run(schedules_info, state, req)),
        "schedules.repairEntries" => Some(run(schedules_repair_entries, state, req)),
        _ => None,
    }
}
