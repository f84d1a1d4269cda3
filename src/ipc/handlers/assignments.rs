use crate::ipc::error::ok;
use crate::ipc::helpers::{
    delete_failed, insert_failed, optional_bool, optional_f64, optional_str, query_failed,
    require_conn, required_f64, required_str, tx_failed, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::status::{close_assignment, publish_assignment, AssignmentStatus};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

fn assignment_row_json(conn: &Connection, assignment_id: &str) -> Result<JsonValue, HandlerErr> {
    conn.query_row(
        "SELECT id, class_id, subject_id, title, description, instructions, due_at,
                total_marks, status, visible_to_students, allow_late
         FROM assignments WHERE id = ?",
        [assignment_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classId": r.get::<_, String>(1)?,
                "subjectId": r.get::<_, String>(2)?,
                "title": r.get::<_, String>(3)?,
                "description": r.get::<_, Option<String>>(4)?,
                "instructions": r.get::<_, Option<String>>(5)?,
                "dueAt": r.get::<_, String>(6)?,
                "totalMarks": r.get::<_, f64>(7)?,
                "status": r.get::<_, String>(8)?,
                "visibleToStudents": r.get::<_, i64>(9)? != 0,
                "allowLate": r.get::<_, i64>(10)? != 0
            }))
        },
    )
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| HandlerErr::new("not_found", "assignment not found"))
}

fn load_status(conn: &Connection, assignment_id: &str) -> Result<AssignmentStatus, HandlerErr> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM assignments WHERE id = ?",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(raw) = raw else {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    };
    AssignmentStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::new("db_query_failed", "corrupt assignment status"))
}

fn assignments_list(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let subject_id = optional_str(params, "subjectId");

    let sql = "SELECT a.id, a.subject_id, a.title, a.due_at, a.total_marks, a.status,
                      a.visible_to_students, a.allow_late,
                      (SELECT COUNT(*) FROM submissions sb WHERE sb.assignment_id = a.id)
               FROM assignments a
               WHERE a.class_id = ?1
                 AND (?2 IS NULL OR a.subject_id = ?2)
               ORDER BY a.due_at, a.title";
    let mut stmt = conn.prepare(sql).map_err(query_failed)?;
    let assignments = stmt
        .query_map((&class_id, &subject_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "dueAt": r.get::<_, String>(3)?,
                "totalMarks": r.get::<_, f64>(4)?,
                "status": r.get::<_, String>(5)?,
                "visibleToStudents": r.get::<_, i64>(6)? != 0,
                "allowLate": r.get::<_, i64>(7)? != 0,
                "submissionCount": r.get::<_, i64>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "assignments": assignments }))
}

fn assignments_create(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let subject_id = required_str(params, "subjectId")?;
    let title = required_str(params, "title")?;
    let due_at = required_str(params, "dueAt")?;
    let total_marks = required_f64(params, "totalMarks")?;
    let description = optional_str(params, "description");
    let instructions = optional_str(params, "instructions");
    let visible = optional_bool(params, "visibleToStudents", false)?;
    let allow_late = optional_bool(params, "allowLate", false)?;

    if total_marks <= 0.0 {
        return Err(HandlerErr::new(
            "out_of_range",
            "totalMarks must be positive",
        ));
    }

    // Assignments only exist against a subject the class actually offers.
    let linked: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subject_links WHERE class_id = ? AND subject_id = ?",
            (&class_id, &subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if linked.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "class is not linked to this subject",
        ));
    }

    let assignment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, class_id, subject_id, title, description, instructions,
                                 due_at, total_marks, status, visible_to_students, allow_late)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, ?)",
        (
            &assignment_id,
            &class_id,
            &subject_id,
            &title,
            &description,
            &instructions,
            &due_at,
            total_marks,
            visible as i64,
            allow_late as i64,
        ),
    )
    .map_err(insert_failed)?;

    assignment_row_json(conn, &assignment_id).map(|assignment| json!({ "assignment": assignment }))
}

fn assignments_update(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let assignment_id = required_str(params, "assignmentId")?;

    let status = load_status(conn, &assignment_id)?;
    if status == AssignmentStatus::Closed {
        return Err(HandlerErr::new(
            "invalid_transition",
            "a closed assignment cannot be edited",
        ));
    }

    if let Some(title) = optional_str(params, "title") {
        conn.execute(
            "UPDATE assignments SET title = ? WHERE id = ?",
            (&title, &assignment_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(description) = optional_str(params, "description") {
        conn.execute(
            "UPDATE assignments SET description = ? WHERE id = ?",
            (&description, &assignment_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(instructions) = optional_str(params, "instructions") {
        conn.execute(
            "UPDATE assignments SET instructions = ? WHERE id = ?",
            (&instructions, &assignment_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(due_at) = optional_str(params, "dueAt") {
        conn.execute(
            "UPDATE assignments SET due_at = ? WHERE id = ?",
            (&due_at, &assignment_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(total_marks) = optional_f64(params, "totalMarks")? {
        if total_marks <= 0.0 {
            return Err(HandlerErr::new(
                "out_of_range",
                "totalMarks must be positive",
            ));
        }
        conn.execute(
            "UPDATE assignments SET total_marks = ? WHERE id = ?",
            (total_marks, &assignment_id),
        )
        .map_err(update_failed)?;
    }
    if params
        .get("visibleToStudents")
        .map(|v| !v.is_null())
        .unwrap_or(false)
    {
        let visible = optional_bool(params, "visibleToStudents", false)?;
        conn.execute(
            "UPDATE assignments SET visible_to_students = ? WHERE id = ?",
            (visible as i64, &assignment_id),
        )
        .map_err(update_failed)?;
    }
    if params.get("allowLate").map(|v| !v.is_null()).unwrap_or(false) {
        let allow_late = optional_bool(params, "allowLate", false)?;
        conn.execute(
            "UPDATE assignments SET allow_late = ? WHERE id = ?",
            (allow_late as i64, &assignment_id),
        )
        .map_err(update_failed)?;
    }

    assignment_row_json(conn, &assignment_id).map(|assignment| json!({ "assignment": assignment }))
}

fn assignments_publish(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let assignment_id = required_str(params, "assignmentId")?;

    let current = load_status(conn, &assignment_id)?;
    let next =
        publish_assignment(current).map_err(|e| HandlerErr::new("invalid_transition", e.message))?;

    conn.execute(
        "UPDATE assignments SET status = ? WHERE id = ?",
        (next.as_str(), &assignment_id),
    )
    .map_err(update_failed)?;

    Ok(json!({ "assignmentId": assignment_id, "status": next.as_str() }))
}

fn assignments_close(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let assignment_id = required_str(params, "assignmentId")?;

    let current = load_status(conn, &assignment_id)?;
    let next =
        close_assignment(current).map_err(|e| HandlerErr::new("invalid_transition", e.message))?;

    conn.execute(
        "UPDATE assignments SET status = ? WHERE id = ?",
        (next.as_str(), &assignment_id),
    )
    .map_err(update_failed)?;

    Ok(json!({ "assignmentId": assignment_id, "status": next.as_str() }))
}

fn assignments_delete(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let assignment_id = required_str(params, "assignmentId")?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    }

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    tx.execute(
        "DELETE FROM submissions WHERE assignment_id = ?",
        [&assignment_id],
    )
    .map_err(delete_failed)?;
    tx.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id])
        .map_err(delete_failed)?;
    tx.commit().map_err(tx_failed)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "assignments.list" => assignments_list(state, &req.params),
        "assignments.create" => assignments_create(state, &req.params),
        "assignments.update" => assignments_update(state, &req.params),
        "assignments.publish" => assignments_publish(state, &req.params),
        "assignments.close" => assignments_close(state, &req.params),
        "assignments.delete" => assignments_delete(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
