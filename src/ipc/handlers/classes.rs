use crate::ipc::error::ok;
use crate::ipc::helpers::{
    delete_failed, insert_failed, now_ts, optional_bool, optional_str, query_failed, require_conn,
    required_str, tx_failed, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

fn class_row_json(conn: &Connection, class_id: &str) -> Result<JsonValue, HandlerErr> {
    conn.query_row(
        "SELECT id, name, code, level, stream, description, active FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "level": r.get::<_, Option<String>>(3)?,
                "stream": r.get::<_, Option<String>>(4)?,
                "description": r.get::<_, Option<String>>(5)?,
                "active": r.get::<_, i64>(6)? != 0
            }))
        },
    )
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| HandlerErr::new("not_found", "class not found"))
}

fn classes_list(state: &AppState, _params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;

    // Include link counts so the admin dashboard can render without extra
    // round trips.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.code,
               c.level,
               c.stream,
               c.active,
               (SELECT COUNT(*) FROM student_links sl WHERE sl.class_id = c.id) AS student_count,
               (SELECT COUNT(*) FROM subject_links sj WHERE sj.class_id = c.id) AS subject_count
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(query_failed)?;

    let classes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "level": r.get::<_, Option<String>>(3)?,
                "stream": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
                "studentCount": r.get::<_, i64>(6)?,
                "subjectCount": r.get::<_, i64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "classes": classes }))
}

fn classes_create(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let name = required_str(params, "name")?;
    let code = required_str(params, "code")?;
    let level = optional_str(params, "level");
    let stream = optional_str(params, "stream");
    let description = optional_str(params, "description");

    let taken: Option<String> = conn
        .query_row("SELECT id FROM classes WHERE code = ?", [&code], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if taken.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            format!("class code '{}' is already in use", code),
            json!({ "code": code }),
        ));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, code, level, stream, description, active)
         VALUES(?, ?, ?, ?, ?, ?, 1)",
        (&class_id, &name, &code, &level, &stream, &description),
    )
    .map_err(insert_failed)?;

    class_row_json(conn, &class_id).map(|class| json!({ "class": class }))
}

fn classes_update(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;

    let current_code: Option<String> = conn
        .query_row("SELECT code FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    let Some(current_code) = current_code else {
        return Err(HandlerErr::new("not_found", "class not found"));
    };

    // The code is the durable external identity of a class; it never changes
    // after creation.
    if let Some(requested) = optional_str(params, "code") {
        if requested != current_code {
            return Err(HandlerErr::new(
                "conflict",
                "class code is immutable after creation",
            ));
        }
    }

    if let Some(name) = optional_str(params, "name") {
        conn.execute("UPDATE classes SET name = ? WHERE id = ?", (&name, &class_id))
            .map_err(update_failed)?;
    }
    if let Some(level) = optional_str(params, "level") {
        conn.execute(
            "UPDATE classes SET level = ? WHERE id = ?",
            (&level, &class_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(stream) = optional_str(params, "stream") {
        conn.execute(
            "UPDATE classes SET stream = ? WHERE id = ?",
            (&stream, &class_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(description) = optional_str(params, "description") {
        conn.execute(
            "UPDATE classes SET description = ? WHERE id = ?",
            (&description, &class_id),
        )
        .map_err(update_failed)?;
    }
    if params.get("active").map(|v| !v.is_null()).unwrap_or(false) {
        let active = optional_bool(params, "active", true)?;
        conn.execute(
            "UPDATE classes SET active = ? WHERE id = ?",
            (active as i64, &class_id),
        )
        .map_err(update_failed)?;
    }

    class_row_json(conn, &class_id).map(|class| json!({ "class": class }))
}

fn classes_delete(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for table in [
        "gradebook_assignments",
        "gradebook_tests",
        "gradebook_exams",
        "gradebook_rubrics",
    ] {
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE entry_id IN (
                   SELECT id FROM gradebook_entries WHERE class_id = ?
                 )",
                table
            ),
            [&class_id],
        )
        .map_err(delete_failed)?;
    }
    tx.execute("DELETE FROM gradebook_entries WHERE class_id = ?", [&class_id])
        .map_err(delete_failed)?;
    tx.execute(
        "DELETE FROM submissions WHERE assignment_id IN (
           SELECT id FROM assignments WHERE class_id = ?
         )",
        [&class_id],
    )
    .map_err(delete_failed)?;
    tx.execute("DELETE FROM assignments WHERE class_id = ?", [&class_id])
        .map_err(delete_failed)?;
    tx.execute(
        "DELETE FROM teacher_links WHERE subject_link_id IN (
           SELECT id FROM subject_links WHERE class_id = ?
         )",
        [&class_id],
    )
    .map_err(delete_failed)?;
    tx.execute("DELETE FROM subject_links WHERE class_id = ?", [&class_id])
        .map_err(delete_failed)?;
    tx.execute("DELETE FROM student_links WHERE class_id = ?", [&class_id])
        .map_err(delete_failed)?;
    tx.execute("DELETE FROM prefects WHERE class_id = ?", [&class_id])
        .map_err(delete_failed)?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(delete_failed)?;

    tx.commit().map_err(tx_failed)?;
    Ok(json!({ "deleted": true }))
}

fn prefects_list(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;

    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.student_id, s.last_name, s.first_name, p.position,
                    p.assigned_at, p.assigned_by
             FROM prefects p
             JOIN students s ON s.id = p.student_id
             WHERE p.class_id = ?
             ORDER BY p.position, s.last_name",
        )
        .map_err(query_failed)?;
    let prefects = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "position": r.get::<_, String>(4)?,
                "assignedAt": r.get::<_, String>(5)?,
                "assignedBy": r.get::<_, Option<String>>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "prefects": prefects }))
}

fn prefects_assign(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let position = required_str(params, "position")?;
    let assigned_by = optional_str(params, "assignedBy");

    let class_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if class_exists.is_none() {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let student_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if student_exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM prefects WHERE class_id = ? AND student_id = ? AND position = ?",
            (&class_id, &student_id, &position),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if duplicate.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "student already holds this position in the class",
            json!({ "position": position }),
        ));
    }

    let prefect_id = Uuid::new_v4().to_string();
    let assigned_at = now_ts();
    conn.execute(
        "INSERT INTO prefects(id, class_id, student_id, position, assigned_at, assigned_by)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &prefect_id,
            &class_id,
            &student_id,
            &position,
            &assigned_at,
            &assigned_by,
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({
        "prefectId": prefect_id,
        "position": position,
        "assignedAt": assigned_at
    }))
}

fn prefects_remove(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let prefect_id = required_str(params, "prefectId")?;

    // Idempotent: removing an already-removed prefect is a success.
    let n = conn
        .execute("DELETE FROM prefects WHERE id = ?", [&prefect_id])
        .map_err(delete_failed)?;
    Ok(json!({ "removed": n > 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => classes_list(state, &req.params),
        "classes.create" => classes_create(state, &req.params),
        "classes.update" => classes_update(state, &req.params),
        "classes.delete" => classes_delete(state, &req.params),
        "prefects.list" => prefects_list(state, &req.params),
        "prefects.assign" => prefects_assign(state, &req.params),
        "prefects.remove" => prefects_remove(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
