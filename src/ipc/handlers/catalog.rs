use crate::ipc::error::ok;
use crate::ipc::helpers::{
    optional_bool, optional_str, require_admin, require_db, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn levels_list(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut stmt = conn
        .prepare("SELECT id, name FROM levels ORDER BY name")
        .map_err(|e| HandlerErr::db("db_query_failed", e, "levels"))?;
    let levels = stmt
        .query_map([], |r| {
            Ok(json!({ "id": r.get::<_, String>(0)?, "name": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "levels"))?;
    Ok(json!({ "levels": levels }))
}

fn levels_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let level_id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO levels(id, name) VALUES(?, ?)", (&level_id, &name))
        .map_err(|e| HandlerErr::db("db_insert_failed", e, "levels"))?;
    Ok(json!({ "levelId": level_id, "name": name }))
}

fn grades_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let level_id = optional_str(params, "levelId")?;
    let sql = "SELECT g.id, g.level_id, g.name, l.name
               FROM grades g
               JOIN levels l ON l.id = g.level_id
               WHERE (?1 IS NULL OR g.level_id = ?1)
               ORDER BY l.name, g.name";
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e, "grades"))?;
    let grades = stmt
        .query_map([&level_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "levelId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "levelName": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "grades"))?;
    Ok(json!({ "grades": grades }))
}

fn grades_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let level_id = required_str(params, "levelId")?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(id, level_id, name) VALUES(?, ?, ?)",
        (&grade_id, &level_id, &name),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "grades"))?;
    Ok(json!({ "gradeId": grade_id, "name": name }))
}

fn sections_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let grade_id = required_str(params, "gradeId")?;
    let mut stmt = conn
        .prepare("SELECT id, name FROM sections WHERE grade_id = ? ORDER BY name")
        .map_err(|e| HandlerErr::db("db_query_failed", e, "sections"))?;
    let sections = stmt
        .query_map([&grade_id], |r| {
            Ok(json!({ "id": r.get::<_, String>(0)?, "name": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "sections"))?;
    Ok(json!({ "sections": sections }))
}

fn sections_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let grade_id = required_str(params, "gradeId")?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let section_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, grade_id, name) VALUES(?, ?, ?)",
        (&section_id, &grade_id, &name),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "sections"))?;
    Ok(json!({ "sectionId": section_id, "name": name }))
}

fn courses_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let active_only = optional_bool(params, "activeOnly")?.unwrap_or(false);
    let sql = if active_only {
        "SELECT id, name, active FROM courses WHERE active = 1 ORDER BY name"
    } else {
        "SELECT id, name, active FROM courses ORDER BY name"
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e, "courses"))?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "active": r.get::<_, i64>(2)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "courses"))?;
    Ok(json!({ "courses": courses }))
}

fn courses_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name, active) VALUES(?, ?, 1)",
        (&course_id, &name),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "courses"))?;
    Ok(json!({ "courseId": course_id, "name": name }))
}

fn courses_set_active(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let course_id = required_str(params, "courseId")?;
    let active = optional_bool(params, "active")?
        .ok_or_else(|| HandlerErr::new("bad_params", "missing active"))?;
    let changed = conn
        .execute(
            "UPDATE courses SET active = ? WHERE id = ?",
            (active as i64, &course_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e, "courses"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "course not found"));
    }
    Ok(json!({ "courseId": course_id, "active": active }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "levels.list" => levels_list(state),
        "levels.create" => levels_create(state, &req.params),
        "grades.list" => grades_list(state, &req.params),
        "grades.create" => grades_create(state, &req.params),
        "sections.list" => sections_list(state, &req.params),
        "sections.create" => sections_create(state, &req.params),
        "courses.list" => courses_list(state, &req.params),
        "courses.create" => courses_create(state, &req.params),
        "courses.setActive" => courses_set_active(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
