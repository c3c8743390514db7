use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::ipc::error::{err, ok, ErrCode, HandlerErr};
use crate::ipc::helpers::{now_iso, parse_params, resolve_template};
use crate::ipc::types::{AppState, Request};
use crate::schedule;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTemplateParams {
    id: Option<String>,
    name: String,
    description: Option<String>,
    duration_days: i64,
    readings: Vec<TemplateUnitParams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateUnitParams {
    day_number: i64,
    start_book_id: Option<String>,
    start_book_name: Option<String>,
    end_book_id: Option<String>,
    end_book_name: Option<String>,
    #[serde(default)]
    portions: serde_json::Value,
    raw_reading: Option<String>,
}

fn templates_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: CreateTemplateParams = parse_params(params)?;

    let name = params.name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if params.duration_days < 1 {
        return Err(HandlerErr::bad_params("durationDays must be at least 1"));
    }
    if params.readings.is_empty() {
        return Err(HandlerErr::bad_params("readings must not be empty"));
    }

    // Day numbers must be exactly 1..durationDays, no gaps or duplicates.
    let mut day_numbers: Vec<i64> = params.readings.iter().map(|u| u.day_number).collect();
    day_numbers.sort_unstable();
    let contiguous = day_numbers.len() as i64 == params.duration_days
        && day_numbers
            .iter()
            .enumerate()
            .all(|(i, d)| *d == i as i64 + 1);
    if !contiguous {
        return Err(HandlerErr::invalid_state(
            "readings must cover day numbers 1..durationDays with no gaps or duplicates",
        ));
    }

    let template_id = match params.id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => schedule::group_slug(&name),
    };
    if template_id.is_empty() {
        return Err(HandlerErr::bad_params(
            "template id could not be derived from name",
        ));
    }

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM templates WHERE id = ?", [&template_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_some() {
        return Err(HandlerErr::conflict(format!(
            "template {template_id} already exists"
        )));
    }

    let now = now_iso();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO templates(id, name, description, duration_days, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &template_id,
            &name,
            &params.description,
            params.duration_days,
            &now,
            &now,
        ),
    )?;
    for unit in &params.readings {
        let portions = if unit.portions.is_null() {
            "[]".to_string()
        } else {
            unit.portions.to_string()
        };
        tx.execute(
            "INSERT INTO template_units(template_id, day_number, start_book_id, start_book_name,
                                        end_book_id, end_book_name, portions, raw_reading)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &template_id,
                unit.day_number,
                &unit.start_book_id,
                &unit.start_book_name,
                &unit.end_book_id,
                &unit.end_book_name,
                &portions,
                &unit.raw_reading,
            ),
        )?;
    }
    tx.commit()?;

    Ok(json!({
        "templateId": template_id,
        "name": name,
        "durationDays": params.duration_days,
        "unitCount": params.readings.len()
    }))
}

fn templates_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.description,
           t.duration_days,
           t.created_at,
           t.updated_at,
           (SELECT COUNT(*) FROM template_units u WHERE u.template_id = t.id) AS unit_count
         FROM templates t
         ORDER BY t.name",
    )?;
    let templates = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "durationDays": r.get::<_, i64>(3)?,
                "createdAt": r.get::<_, String>(4)?,
                "updatedAt": r.get::<_, String>(5)?,
                "dailyReadingsCount": r.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let count = templates.len();
    Ok(json!({ "templates": templates, "count": count }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetTemplateParams {
    template_id: String,
}

fn templates_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let params: GetTemplateParams = parse_params(params)?;
    let (meta, units) = resolve_template(conn, &params.template_id)?;

    let readings: Vec<serde_json::Value> = units
        .iter()
        .map(|u| {
            let portions: serde_json::Value =
                serde_json::from_str(&u.portions).unwrap_or(serde_json::Value::Null);
            let mut reading = json!({
                "dayNumber": u.day_number,
                "startBookId": u.start_book_id,
                "startBookName": u.start_book_name,
                "endBookId": u.end_book_id,
                "endBookName": u.end_book_name,
                "portions": portions
            });
            if let Some(raw) = &u.raw_reading {
                reading["rawReading"] = json!(raw);
            }
            reading
        })
        .collect();

    Ok(json!({
        "template": {
            "id": meta.id,
            "name": meta.name,
            "description": meta.description,
            "durationDays": meta.duration_days,
            "dailyReadingsCount": readings.len()
        },
        "readings": readings
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
        "templates.create" => Some(run(templates_create, state, req)),
        "templates.list" => Some(run(|conn, _| templates_list(conn), state, req)),
        "templates.get" => Some(run(templates_get, state, req)),
        _ => None,
    }
}
