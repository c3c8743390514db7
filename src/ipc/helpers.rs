use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::ipc::error::HandlerErr;
use crate::schedule::{self, TaskSet};

pub const KIND_INDIVIDUAL: &str = "individual";
pub const KIND_GROUP: &str = "group";

/// Store writes are grouped into bounded batches; each batch commits before
/// the next starts, so a crash can leave a prefix of the entries written.
pub const WRITE_BATCH_SIZE: usize = 500;

pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid params: {e}")))
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn require_date(field: &str, value: &str) -> Result<NaiveDate, HandlerErr> {
    schedule::parse_date(value)
        .ok_or_else(|| HandlerErr::bad_params(format!("{field} must be a YYYY-MM-DD date")))
}

#[derive(Debug, Clone)]
pub struct TemplateMeta {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub duration_days: i64,
}

#[derive(Debug, Clone)]
pub struct TemplateUnitRow {
    pub day_number: i64,
    pub start_book_id: Option<String>,
    pub start_book_name: Option<String>,
    pub end_book_id: Option<String>,
    pub end_book_name: Option<String>,
    pub portions: String,
    pub raw_reading: Option<String>,
}

/// Loads a template and its units, ordered by day number regardless of
/// storage order. NotFound when the template is missing or has zero units.
pub fn resolve_template(
    conn: &Connection,
    template_id: &str,
) -> Result<(TemplateMeta, Vec<TemplateUnitRow>), HandlerErr> {
    let meta = conn
        .query_row(
            "SELECT id, name, description, duration_days FROM templates WHERE id = ?",
            [template_id],
            |r| {
                Ok(TemplateMeta {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                    duration_days: r.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found(format!("template {template_id} not found")))?;

    let mut stmt = conn.prepare(
        "SELECT day_number, start_book_id, start_book_name, end_book_id, end_book_name,
                portions, raw_reading
         FROM template_units
         WHERE template_id = ?
         ORDER BY day_number",
    )?;
    let units = stmt
        .query_map([template_id], |r| {
            Ok(TemplateUnitRow {
                day_number: r.get(0)?,
                start_book_id: r.get(1)?,
                start_book_name: r.get(2)?,
                end_book_id: r.get(3)?,
                end_book_name: r.get(4)?,
                portions: r.get(5)?,
                raw_reading: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    if units.is_empty() {
        return Err(HandlerErr::not_found(format!(
            "no daily readings found for template {template_id}"
        )));
    }
    Ok((meta, units))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeMode {
    /// Fresh creation: every entry is written.
    Overwrite,
    /// Repair: only entries missing after a partial materialization.
    FillMissing,
}

/// Writes one dated daily entry per template unit, in batches of at most
/// WRITE_BATCH_SIZE rows. Each full batch commits before the next starts;
/// there is no rollback across batches. Returns the number of rows written.
pub fn materialize_daily_entries(
    conn: &Connection,
    owner_kind: &str,
    owner_id: &str,
    start: NaiveDate,
    units: &[TemplateUnitRow],
    mode: MaterializeMode,
) -> Result<usize, HandlerErr> {
    let sql = match mode {
        MaterializeMode::Overwrite => {
            "INSERT OR REPLACE INTO daily_entries(
                owner_kind, owner_id, day_number, scheduled_date, day_of_week,
                start_book_id, start_book_name, end_book_id, end_book_name,
                portions, raw_reading)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        }
        MaterializeMode::FillMissing => {
            "INSERT OR IGNORE INTO daily_entries(
                owner_kind, owner_id, day_number, scheduled_date, day_of_week,
                start_book_id, start_book_name, end_book_id, end_book_name,
                portions, raw_reading)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        }
    };

    let mut written = 0usize;
    for chunk in units.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.unchecked_transaction()?;
        for unit in chunk {
            let date = schedule::scheduled_date(start, unit.day_number);
            let changed = tx.execute(
                sql,
                (
                    owner_kind,
                    owner_id,
                    unit.day_number,
                    schedule::format_date(date),
                    schedule::day_of_week(date),
                    &unit.start_book_id,
                    &unit.start_book_name,
                    &unit.end_book_id,
                    &unit.end_book_name,
                    &unit.portions,
                    &unit.raw_reading,
                ),
            )?;
            written += changed;
        }
        tx.commit()?;
    }
    Ok(written)
}

#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub id: String,
    pub user_id: String,
    pub template_id: String,
    pub template_name: String,
    pub start_date: String,
    pub end_date: String,
    pub duration_days: i64,
    pub current_day: i64,
    pub completed_days: i64,
    pub status: String,
    pub tasks: TaskSet,
    pub created_at: String,
    pub updated_at: String,
}

fn schedule_from_row(r: &Row) -> rusqlite::Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        template_id: r.get(2)?,
        template_name: r.get(3)?,
        start_date: r.get(4)?,
        end_date: r.get(5)?,
        duration_days: r.get(6)?,
        current_day: r.get(7)?,
        completed_days: r.get(8)?,
        status: r.get(9)?,
        tasks: TaskSet {
            verse_text: r.get::<_, i64>(10)? != 0,
            footnotes: r.get::<_, i64>(11)? != 0,
            partner: r.get::<_, i64>(12)? != 0,
        },
        created_at: r.get(13)?,
        updated_at: r.get(14)?,
    })
}

pub const SCHEDULE_COLUMNS: &str = "id, user_id, template_id, template_name, start_date, \
     end_date, duration_days, current_day, completed_days, status, \
     task_verse_text, task_footnotes, task_partner, created_at, updated_at";

pub fn load_schedule(conn: &Connection, id: &str) -> Result<Option<ScheduleRow>, HandlerErr> {
    let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?");
    Ok(conn
        .query_row(&sql, [id], |r| schedule_from_row(r))
        .optional()?)
}

pub fn list_schedules_for_user(
    conn: &Connection,
    user_id: &str,
    active_only: bool,
) -> Result<Vec<ScheduleRow>, HandlerErr> {
    let sql = if active_only {
        format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE user_id = ? AND status = 'active' ORDER BY created_at DESC")
    } else {
        format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE user_id = ? ORDER BY created_at DESC")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], |r| schedule_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub template_name: String,
    pub start_date: String,
    pub end_date: String,
    pub duration_days: i64,
    pub current_day: i64,
    pub status: String,
    pub created_by: String,
    pub is_public: bool,
    pub max_members: Option<i64>,
    pub tasks: TaskSet,
    pub created_at: String,
    pub updated_at: String,
}

fn group_from_row(r: &Row) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: r.get(0)?,
        name: r.get(1)?,
        template_id: r.get(2)?,
        template_name: r.get(3)?,
        start_date: r.get(4)?,
        end_date: r.get(5)?,
        duration_days: r.get(6)?,
        current_day: r.get(7)?,
        status: r.get(8)?,
        created_by: r.get(9)?,
        is_public: r.get::<_, i64>(10)? != 0,
        max_members: r.get(11)?,
        tasks: TaskSet {
            verse_text: r.get::<_, i64>(12)? != 0,
            footnotes: r.get::<_, i64>(13)? != 0,
            partner: r.get::<_, i64>(14)? != 0,
        },
        created_at: r.get(15)?,
        updated_at: r.get(16)?,
    })
}

pub const GROUP_COLUMNS: &str = "id, name, template_id, template_name, start_date, end_date, \
     duration_days, current_day, status, created_by, is_public, max_members, \
     task_verse_text, task_footnotes, task_partner, created_at, updated_at";

pub fn load_group(conn: &Connection, id: &str) -> Result<Option<GroupRow>, HandlerErr> {
    let sql = format!("SELECT {GROUP_COLUMNS} FROM reading_groups WHERE id = ?");
    Ok(conn
        .query_row(&sql, [id], |r| group_from_row(r))
        .optional()?)
}

pub fn list_public_active_groups(conn: &Connection) -> Result<Vec<GroupRow>, HandlerErr> {
    let sql = format!(
        "SELECT {GROUP_COLUMNS} FROM reading_groups
         WHERE is_public = 1 AND status = 'active'
         ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| group_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub user_id: String,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub role: String,
    pub status: String,
    pub joined_at: String,
    pub left_at: Option<String>,
    pub rejoined_at: Option<String>,
    pub current_day: i64,
    pub completed_days: i64,
    pub last_active_at: String,
}

fn member_from_row(r: &Row) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        user_id: r.get(0)?,
        user_name: r.get(1)?,
        email: r.get(2)?,
        role: r.get(3)?,
        status: r.get(4)?,
        joined_at: r.get(5)?,
        left_at: r.get(6)?,
        rejoined_at: r.get(7)?,
        current_day: r.get(8)?,
        completed_days: r.get(9)?,
        last_active_at: r.get(10)?,
    })
}

pub const MEMBER_COLUMNS: &str = "user_id, user_name, email, role, status, joined_at, left_at, \
     rejoined_at, current_day, completed_days, last_active_at";

pub fn load_member(
    conn: &Connection,
    group_id: &str,
    user_id: &str,
) -> Result<Option<MemberRow>, HandlerErr> {
    let sql = format!("SELECT {MEMBER_COLUMNS} FROM group_members WHERE group_id = ? AND user_id = ?");
    Ok(conn
        .query_row(&sql, (group_id, user_id), |r| member_from_row(r))
        .optional()?)
}

pub fn list_members(
    conn: &Connection,
    group_id: &str,
    active_only: bool,
) -> Result<Vec<MemberRow>, HandlerErr> {
    // Admins first, then by join date, earliest first.
    let sql = if active_only {
        format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members
             WHERE group_id = ? AND status = 'active'
             ORDER BY CASE role WHEN 'admin' THEN 0 ELSE 1 END, joined_at"
        )
    } else {
        format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members
             WHERE group_id = ?
             ORDER BY CASE role WHEN 'admin' THEN 0 ELSE 1 END, joined_at"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([group_id], |r| member_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

/// Capacity decisions always use a live count, never a cached counter.
pub fn active_member_count(conn: &Connection, group_id: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ? AND status = 'active'",
        [group_id],
        |r| r.get(0),
    )?)
}

pub fn active_admin_count(conn: &Connection, group_id: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM group_members
         WHERE group_id = ? AND role = 'admin' AND status = 'active'",
        [group_id],
        |r| r.get(0),
    )?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressStats {
    pub records: i64,
    pub completed: i64,
    pub points: i64,
}

/// Walks a user's progress records once, scoring each with the task-map
/// rule (legacy records with no task map score 1 when completed).
pub fn progress_stats(
    conn: &Connection,
    owner_kind: &str,
    owner_id: &str,
    user_id: &str,
) -> Result<ProgressStats, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT task_verse_text, task_footnotes, task_partner, is_completed
         FROM progress_records
         WHERE owner_kind = ? AND owner_id = ? AND user_id = ?",
    )?;
    let rows = stmt
        .query_map((owner_kind, owner_id, user_id), |r| {
            let verse_text: Option<i64> = r.get(0)?;
            let footnotes: Option<i64> = r.get(1)?;
            let partner: Option<i64> = r.get(2)?;
            let is_completed: i64 = r.get(3)?;
            Ok((verse_text, footnotes, partner, is_completed != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut stats = ProgressStats::default();
    for (verse_text, footnotes, partner, is_completed) in rows {
        stats.records += 1;
        if is_completed {
            stats.completed += 1;
        }
        let tasks = verse_text.map(|v| TaskSet {
            verse_text: v != 0,
            footnotes: footnotes.unwrap_or(0) != 0,
            partner: partner.unwrap_or(0) != 0,
        });
        stats.points += schedule::record_points(tasks, is_completed);
    }
    Ok(stats)
}

pub fn count_completed(
    conn: &Connection,
    owner_kind: &str,
    owner_id: &str,
    user_id: &str,
) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM progress_records
         WHERE owner_kind = ? AND owner_id = ? AND user_id = ? AND is_completed = 1",
        (owner_kind, owner_id, user_id),
        |r| r.get(0),
    )?)
}
