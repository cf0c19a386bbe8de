use crate::gradebook::{
    self, AssignmentScope, AttendancePatch, BimesterStatus, GradebookView,
};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    gradebook_err, optional_counter, optional_str, require_db, require_session, required_str,
    HandlerErr,
};
use crate::ipc::types::{Actor, AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Admins may open any gradebook; a teacher only their own assignments.
fn ensure_can_grade(
    conn: &Connection,
    actor: &Actor,
    scope: &AssignmentScope,
) -> Result<(), HandlerErr> {
    if actor.role == Role::Admin {
        return Ok(());
    }
    let owns = conn
        .query_row(
            "SELECT 1 FROM teachers WHERE id = ? AND profile_id = ?",
            (&scope.teacher_id, &actor.profile_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teachers"))?
        .is_some();
    if !owns {
        return Err(HandlerErr::new(
            "forbidden",
            "assignment belongs to another teacher",
        ));
    }
    Ok(())
}

fn roster_json(view_roster: &[gradebook::RosterStudent]) -> Vec<serde_json::Value> {
    view_roster
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "firstNames": s.first_names,
                "lastNames": s.last_names,
                "dni": s.dni,
                "studentCode": s.student_code
            })
        })
        .collect()
}

fn handle_roster(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_session(state)?.clone();
    let conn = require_db(state)?;
    let assignment_id = required_str(params, "assignmentId")?;
    let scope = gradebook::assignment_scope(conn, &assignment_id).map_err(gradebook_err)?;
    ensure_can_grade(conn, &actor, &scope)?;
    let roster = gradebook::resolve_roster(conn, &scope).map_err(gradebook_err)?;
    Ok(json!({ "students": roster_json(&roster) }))
}

fn view_maps(view: &GradebookView) -> (serde_json::Value, serde_json::Value, serde_json::Value) {
    let mut grades = serde_json::Map::new();
    let mut attendance = serde_json::Map::new();
    let mut appreciations = serde_json::Map::new();
    for (student_id, entry) in &view.entries {
        if let Some(g) = &entry.grade {
            grades.insert(student_id.clone(), json!(g));
        }
        if let Some(a) = &entry.attendance {
            attendance.insert(
                student_id.clone(),
                json!({
                    "attendances": a.attendances,
                    "absences": a.absences,
                    "justifications": a.justifications
                }),
            );
        }
        if let Some(t) = &entry.appreciation {
            appreciations.insert(student_id.clone(), json!(t));
        }
    }
    (grades.into(), attendance.into(), appreciations.into())
}

fn handle_open(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_session(state)?.clone();
    let conn = require_db(state)?;
    let assignment_id = required_str(params, "assignmentId")?;
    let requested_bimester = optional_str(params, "bimesterId")?;

    let scope = gradebook::assignment_scope(conn, &assignment_id).map_err(gradebook_err)?;
    ensure_can_grade(conn, &actor, &scope)?;

    let header: (String, String, Option<String>) = conn
        .query_row(
            "SELECT c.name, g.name, sec.name
             FROM teacher_assignments a
             JOIN courses c ON c.id = a.course_id
             JOIN grades g ON g.id = a.grade_id
             LEFT JOIN sections sec ON sec.id = a.section_id
             WHERE a.id = ?",
            [&assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e, "teacher_assignments"))?;

    let mut stmt = conn
        .prepare(
            "SELECT id, number, status FROM bimesters WHERE year_id = ? ORDER BY number",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e, "bimesters"))?;
    let bimesters: Vec<(String, i64, String)> = stmt
        .query_map([&scope.year_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e, "bimesters"))?;

    // Default to the first bimester open for filling, like the original
    // gradebook surface.
    let active_id = match requested_bimester {
        Some(id) => {
            if !bimesters.iter().any(|(bid, _, _)| bid == &id) {
                return Err(HandlerErr::new(
                    "not_found",
                    "bimester not found for the assignment's year",
                ));
            }
            Some(id)
        }
        None => bimesters
            .iter()
            .find(|(_, _, status)| status == "open_fill")
            .or_else(|| bimesters.first())
            .map(|(id, _, _)| id.clone()),
    };

    let bimesters_json: Vec<serde_json::Value> = bimesters
        .iter()
        .map(|(id, number, status)| json!({ "id": id, "number": number, "status": status }))
        .collect();

    let Some(active_id) = active_id else {
        // A year with no bimesters has nothing to fill.
        let roster = gradebook::resolve_roster(conn, &scope).map_err(gradebook_err)?;
        return Ok(json!({
            "assignment": {
                "id": assignment_id,
                "courseName": header.0,
                "gradeName": header.1,
                "sectionName": header.2,
                "yearId": scope.year_id
            },
            "bimesters": bimesters_json,
            "activeBimesterId": null,
            "locked": true,
            "students": roster_json(&roster),
            "grades": {},
            "attendance": {},
            "appreciations": {}
        }));
    };

    let locked = gradebook::bimester_status(conn, &active_id).map_err(gradebook_err)?
        != BimesterStatus::OpenFill;
    let view = gradebook::load_gradebook(conn, &assignment_id, &active_id).map_err(gradebook_err)?;
    let (grades, attendance, appreciations) = view_maps(&view);

    Ok(json!({
        "assignment": {
            "id": assignment_id,
            "courseName": header.0,
            "gradeName": header.1,
            "sectionName": header.2,
            "yearId": scope.year_id
        },
        "bimesters": bimesters_json,
        "activeBimesterId": active_id,
        "locked": locked,
        "students": roster_json(&view.roster),
        "grades": grades,
        "attendance": attendance,
        "appreciations": appreciations
    }))
}

fn handle_set_grade(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_session(state)?.clone();
    let conn = require_db(state)?;
    let bimester_id = required_str(params, "bimesterId")?;
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let value = required_str(params, "value")?;

    let scope = gradebook::assignment_scope(conn, &assignment_id).map_err(gradebook_err)?;
    ensure_can_grade(conn, &actor, &scope)?;
    gradebook::set_grade(
        conn,
        &bimester_id,
        &assignment_id,
        &student_id,
        &value,
        Some(&actor.profile_id),
    )
    .map_err(gradebook_err)?;
    Ok(json!({ "ok": true }))
}

fn handle_set_attendance(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_session(state)?.clone();
    let conn = require_db(state)?;
    let bimester_id = required_str(params, "bimesterId")?;
    let student_id = required_str(params, "studentId")?;
    let patch = AttendancePatch {
        attendances: optional_counter(params, "attendances")?,
        absences: optional_counter(params, "absences")?,
        justifications: optional_counter(params, "justifications")?,
    };

    let merged = gradebook::set_attendance(
        conn,
        &bimester_id,
        &student_id,
        patch,
        Some(&actor.profile_id),
    )
    .map_err(gradebook_err)?;
    Ok(json!({
        "attendances": merged.attendances,
        "absences": merged.absences,
        "justifications": merged.justifications
    }))
}

fn handle_set_appreciation(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_session(state)?.clone();
    let conn = require_db(state)?;
    let bimester_id = required_str(params, "bimesterId")?;
    let student_id = required_str(params, "studentId")?;
    let text = params
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing text"))?;

    gradebook::set_appreciation(conn, &bimester_id, &student_id, text, Some(&actor.profile_id))
        .map_err(gradebook_err)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "gradebook.roster" => handle_roster(state, &req.params),
        "gradebook.open" => handle_open(state, &req.params),
        "gradebook.setGrade" => handle_set_grade(state, &req.params),
        "gradebook.setAttendance" => handle_set_attendance(state, &req.params),
        "gradebook.setAppreciation" => handle_set_appreciation(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
