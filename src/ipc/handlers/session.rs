use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_ts, require_admin, require_db, required_str, optional_str, HandlerErr};
use crate::ipc::types::{Actor, AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn profiles_exist(conn: &Connection) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get::<_, i64>(0))
        .map(|n| n > 0)
        .map_err(|e| HandlerErr::db("db_query_failed", e, "profiles"))
}

fn profiles_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let full_name = required_str(params, "fullName")?;
    let email = optional_str(params, "email")?;
    let role_raw = required_str(params, "role")?;
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::new(
            "bad_params",
            "role must be admin or teacher",
        ));
    };

    // Bootstrap rule: an empty workspace accepts its first profile without a
    // session, and that profile must be an admin. After that, admin only.
    if profiles_exist(conn)? {
        let _ = require_admin(state)?;
    } else if role != Role::Admin {
        return Err(HandlerErr::new(
            "forbidden",
            "the first profile of a workspace must be an admin",
        ));
    }

    let profile_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO profiles(id, email, full_name, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (&profile_id, &email, &full_name, role.as_str(), now_ts()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e, "profiles"))?;

    Ok(json!({ "profileId": profile_id, "role": role.as_str() }))
}

fn session_open(conn: &Connection, params: &serde_json::Value) -> Result<(Actor, serde_json::Value), HandlerErr> {
    let profile_id = required_str(params, "profileId")?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT role, full_name FROM profiles WHERE id = ?",
            [&profile_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e, "profiles"))?;
    let Some((role_raw, full_name)) = row else {
        return Err(HandlerErr::new("not_found", "profile not found"));
    };
    let Some(role) = Role::parse(&role_raw) else {
        // CHECK constraint keeps this unreachable for rows we wrote.
        return Err(HandlerErr::new("db_query_failed", "profile has unknown role"));
    };
    let actor = Actor {
        profile_id: profile_id.clone(),
        role,
    };
    let result = json!({
        "profileId": profile_id,
        "role": role.as_str(),
        "fullName": full_name
    });
    Ok((actor, result))
}

fn handle_profiles_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    match profiles_create(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match session_open(conn, &req.params) {
        Ok((actor, result)) => {
            state.actor = Some(actor);
            ok(&req.id, result)
        }
        Err(error) => error.response(&req.id),
    }
}

fn handle_session_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.actor.as_ref() {
        Some(a) => ok(
            &req.id,
            json!({ "profileId": a.profile_id, "role": a.role.as_str() }),
        ),
        None => ok(&req.id, json!({ "profileId": null, "role": null })),
    }
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.actor = None;
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profiles.create" => Some(handle_profiles_create(state, req)),
        "session.open" => Some(handle_session_open(state, req)),
        "session.current" => Some(handle_session_current(state, req)),
        "session.close" => Some(handle_session_close(state, req)),
        _ => None,
    }
}
