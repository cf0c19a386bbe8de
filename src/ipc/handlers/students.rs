use crate::ipc::error::ok;
use crate::ipc::helpers::{
    now_ts, optional_str, require_admin, require_db, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::json;
use uuid::Uuid;

fn students_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let limit = params.get("limit").and_then(|v| v.as_i64()).unwrap_or(50);
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.student_code, s.dni, s.first_names, s.last_names,
                    g.name, l.name, sec.name, s.active
             FROM students s
             JOIN grades g ON g.id = s.grade_id
             JOIN levels l ON l.id = g.level_id
             LEFT JOIN sections sec ON sec.id = s.section_id
             ORDER BY s.created_at DESC
             LIMIT ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e, "students"))?;
    let students = stmt
        .query_map([limit], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentCode": r.get::<_, Option<String>>(1)?,
                "dni": r.get::<_, Option<String>>(2)?,
                "firstNames": r.get::<_, String>(3)?,
                "lastNames": r.get::<_, String>(4)?,
                "gradeName": r.get::<_, String>(5)?,
                "levelName": r.get::<_, String>(6)?,
                "sectionName": r.get::<_, Option<String>>(7)?,
                "active": r.get::<_, i64>(8)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "students"))?;
    Ok(json!({ "students": students }))
}

fn nonempty(row: &serde_json::Value, key: &str) -> Option<String> {
    row.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn lookup_id(
    tx: &Transaction<'_>,
    sql: &str,
    params: impl rusqlite::Params,
    table: &str,
) -> Result<Option<String>, HandlerErr> {
    tx.query_row(sql, params, |r| r.get::<_, String>(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e, table))
}

/// Bulk roster import. The caller (the upload surface) has already parsed
/// its file into row records; this is the sequential loop that resolves the
/// catalog, creating grades and sections on the fly. Levels are the fixed
/// axis of the catalog, so a row naming an unknown level is skipped rather
/// than inventing one.
fn students_import(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let year_id = required_str(params, "yearId")?;
    let Some(rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing rows"));
    };

    let year_exists: bool = conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e, "academic_years"))?
        .is_some();
    if !year_exists {
        return Err(HandlerErr::new("not_found", "academic year not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e, "students"))?;

    let mut imported: i64 = 0;
    let mut skipped: i64 = 0;
    for row in rows {
        let (Some(first_names), Some(last_names), Some(level_name), Some(grade_name)) = (
            nonempty(row, "firstNames"),
            nonempty(row, "lastNames"),
            nonempty(row, "level"),
            nonempty(row, "grade"),
        ) else {
            skipped += 1;
            continue;
        };
        let dni = nonempty(row, "dni");
        let student_code = nonempty(row, "studentCode");
        let section_name = nonempty(row, "section");

        let Some(level_id) = lookup_id(
            &tx,
            "SELECT id FROM levels WHERE name = ?",
            [&level_name],
            "levels",
        )?
        else {
            skipped += 1;
            continue;
        };

        let grade_id = match lookup_id(
            &tx,
            "SELECT id FROM grades WHERE level_id = ? AND name = ?",
            (&level_id, &grade_name),
            "grades",
        )? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO grades(id, level_id, name) VALUES(?, ?, ?)",
                    (&id, &level_id, &grade_name),
                )
                .map_err(|e| HandlerErr::db("db_insert_failed", e, "grades"))?;
                id
            }
        };

        let section_id = match &section_name {
            None => None,
            Some(name) => Some(
                match lookup_id(
                    &tx,
                    "SELECT id FROM sections WHERE grade_id = ? AND name = ?",
                    (&grade_id, name),
                    "sections",
                )? {
                    Some(id) => id,
                    None => {
                        let id = Uuid::new_v4().to_string();
                        tx.execute(
                            "INSERT INTO sections(id, grade_id, name) VALUES(?, ?, ?)",
                            (&id, &grade_id, name),
                        )
                        .map_err(|e| HandlerErr::db("db_insert_failed", e, "sections"))?;
                        id
                    }
                },
            ),
        };

        // DNI is the stable identity when present; re-imports update in
        // place. Rows without one always insert fresh.
        let student_id = if let Some(dni) = &dni {
            tx.execute(
                "INSERT INTO students(id, student_code, dni, first_names, last_names, grade_id, section_id, active, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                 ON CONFLICT(dni) DO UPDATE SET
                   student_code = excluded.student_code,
                   first_names = excluded.first_names,
                   last_names = excluded.last_names,
                   grade_id = excluded.grade_id,
                   section_id = excluded.section_id,
                   updated_at = excluded.updated_at",
                (
                    Uuid::new_v4().to_string(),
                    &student_code,
                    dni,
                    &first_names,
                    &last_names,
                    &grade_id,
                    &section_id,
                    now_ts(),
                    now_ts(),
                ),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e, "students"))?;
            lookup_id(&tx, "SELECT id FROM students WHERE dni = ?", [dni], "students")?
                .ok_or_else(|| HandlerErr::new("db_query_failed", "student missing after upsert"))?
        } else {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO students(id, student_code, dni, first_names, last_names, grade_id, section_id, active, created_at, updated_at)
                 VALUES(?, ?, NULL, ?, ?, ?, ?, 1, ?, ?)",
                (
                    &id,
                    &student_code,
                    &first_names,
                    &last_names,
                    &grade_id,
                    &section_id,
                    now_ts(),
                    now_ts(),
                ),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e, "students"))?;
            id
        };

        upsert_enrollment(&tx, &year_id, &student_id, &grade_id, section_id.as_deref())?;
        imported += 1;
    }

    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e, "students"))?;
    tracing::info!(imported, skipped, "student import finished");
    Ok(json!({
        "processed": rows.len() as i64,
        "imported": imported,
        "skipped": skipped
    }))
}

fn upsert_enrollment(
    conn: &Connection,
    year_id: &str,
    student_id: &str,
    grade_id: &str,
    section_id: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO enrollments(year_id, student_id, grade_id, section_id)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(year_id, student_id) DO UPDATE SET
           grade_id = excluded.grade_id,
           section_id = excluded.section_id",
        (year_id, student_id, grade_id, section_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e, "enrollments"))?;
    Ok(())
}

fn enrollments_set(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let year_id = required_str(params, "yearId")?;
    let student_id = required_str(params, "studentId")?;
    let grade_id = required_str(params, "gradeId")?;
    let section_id = optional_str(params, "sectionId")?;
    upsert_enrollment(conn, &year_id, &student_id, &grade_id, section_id.as_deref())?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.import" => students_import(state, &req.params),
        "enrollments.set" => enrollments_set(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
