use crate::ipc::error::ok;
use crate::ipc::helpers::{
    now_ts, optional_str, require_admin, require_db, require_session, required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn assignments_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let _ = require_admin(state)?;
    let conn = require_db(state)?;
    let year_id = required_str(params, "yearId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let course_id = required_str(params, "courseId")?;
    let grade_id = required_str(params, "gradeId")?;
    let section_id = optional_str(params, "sectionId")?;

    let assignment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teacher_assignments(id, year_id, teacher_id, course_id, grade_id, section_id, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &assignment_id,
            &year_id,
            &teacher_id,
            &course_id,
            &grade_id,
            &section_id,
            now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "teacher_assignments"))?;
    Ok(json!({ "assignmentId": assignment_id }))
}

fn assignments_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let year_id = required_str(params, "yearId")?;
    let mut stmt = conn
        .prepare(
            "SELECT a.id, p.full_name, c.name, g.name, sec.name
             FROM teacher_assignments a
             JOIN teachers t ON t.id = a.teacher_id
             JOIN profiles p ON p.id = t.profile_id
             JOIN courses c ON c.id = a.course_id
             JOIN grades g ON g.id = a.grade_id
             LEFT JOIN sections sec ON sec.id = a.section_id
             WHERE a.year_id = ?
             ORDER BY p.full_name, c.name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teacher_assignments"))?;
    let assignments = stmt
        .query_map([&year_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "teacherName": r.get::<_, String>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "gradeName": r.get::<_, String>(3)?,
                "sectionName": r.get::<_, Option<String>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teacher_assignments"))?;
    Ok(json!({ "assignments": assignments }))
}

/// The session teacher's own gradebooks. A session without a teachers row
/// (an admin, typically) gets an empty list, matching the original surface.
fn assignments_mine(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_session(state)?;
    let conn = require_db(state)?;
    let teacher_id: Option<String> = conn
        .query_row(
            "SELECT id FROM teachers WHERE profile_id = ?",
            [&actor.profile_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teachers"))?;
    let Some(teacher_id) = teacher_id else {
        return Ok(json!({ "assignments": [] }));
    };

    let mut stmt = conn
        .prepare(
            "SELECT a.id, c.name, g.name, sec.name, y.name, y.status
             FROM teacher_assignments a
             JOIN courses c ON c.id = a.course_id
             JOIN grades g ON g.id = a.grade_id
             LEFT JOIN sections sec ON sec.id = a.section_id
             JOIN academic_years y ON y.id = a.year_id
             WHERE a.teacher_id = ? AND a.active = 1
             ORDER BY y.created_at DESC, c.name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teacher_assignments"))?;
    let assignments = stmt
        .query_map([&teacher_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "courseName": r.get::<_, String>(1)?,
                "gradeName": r.get::<_, String>(2)?,
                "sectionName": r.get::<_, Option<String>>(3)?,
                "yearName": r.get::<_, String>(4)?,
                "yearStatus": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teacher_assignments"))?;
    Ok(json!({ "assignments": assignments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "assignments.create" => assignments_create(state, &req.params),
        "assignments.list" => assignments_list(state, &req.params),
        "assignments.mine" => assignments_mine(state),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
