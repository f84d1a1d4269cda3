use crate::ipc::error::ok;
use crate::ipc::helpers::{
    insert_failed, optional_bool, optional_str, query_failed, require_conn, required_str,
    update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

// Students, teachers, and subjects are workspace-wide registries. They are
// never hard-deleted; rows that leave the school are flagged inactive so
// historical links and gradebook rows keep resolving.

fn students_list(state: &AppState, _params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, student_no, active
             FROM students
             ORDER BY last_name, first_name",
        )
        .map_err(query_failed)?;
    let students = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": last.clone(),
                "firstName": first.clone(),
                "displayName": format!("{}, {}", last, first),
                "studentNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "students": students }))
}

fn students_create(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let student_no = optional_str(params, "studentNo");

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, student_no, active)
         VALUES(?, ?, ?, ?, 1)",
        (&student_id, &last_name, &first_name, &student_no),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "studentId": student_id }))
}

fn students_update(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = required_str(params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    if let Some(last_name) = optional_str(params, "lastName") {
        conn.execute(
            "UPDATE students SET last_name = ? WHERE id = ?",
            (&last_name, &student_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(first_name) = optional_str(params, "firstName") {
        conn.execute(
            "UPDATE students SET first_name = ? WHERE id = ?",
            (&first_name, &student_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(student_no) = optional_str(params, "studentNo") {
        conn.execute(
            "UPDATE students SET student_no = ? WHERE id = ?",
            (&student_no, &student_id),
        )
        .map_err(update_failed)?;
    }
    if params.get("active").map(|v| !v.is_null()).unwrap_or(false) {
        let active = optional_bool(params, "active", true)?;
        conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (active as i64, &student_id),
        )
        .map_err(update_failed)?;
    }

    Ok(json!({ "studentId": student_id }))
}

fn teachers_list(state: &AppState, _params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, email, active
             FROM teachers
             ORDER BY last_name, first_name",
        )
        .map_err(query_failed)?;
    let teachers = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": last.clone(),
                "firstName": first.clone(),
                "displayName": format!("{}, {}", last, first),
                "email": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let email = optional_str(params, "email");

    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, last_name, first_name, email, active)
         VALUES(?, ?, ?, ?, 1)",
        (&teacher_id, &last_name, &first_name, &email),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "teacherId": teacher_id }))
}

fn teachers_update(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let teacher_id = required_str(params, "teacherId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }

    if let Some(last_name) = optional_str(params, "lastName") {
        conn.execute(
            "UPDATE teachers SET last_name = ? WHERE id = ?",
            (&last_name, &teacher_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(first_name) = optional_str(params, "firstName") {
        conn.execute(
            "UPDATE teachers SET first_name = ? WHERE id = ?",
            (&first_name, &teacher_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(email) = optional_str(params, "email") {
        conn.execute(
            "UPDATE teachers SET email = ? WHERE id = ?",
            (&email, &teacher_id),
        )
        .map_err(update_failed)?;
    }
    if params.get("active").map(|v| !v.is_null()).unwrap_or(false) {
        let active = optional_bool(params, "active", true)?;
        conn.execute(
            "UPDATE teachers SET active = ? WHERE id = ?",
            (active as i64, &teacher_id),
        )
        .map_err(update_failed)?;
    }

    Ok(json!({ "teacherId": teacher_id }))
}

fn subjects_list(state: &AppState, _params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let mut stmt = conn
        .prepare("SELECT id, name, code, description FROM subjects ORDER BY name")
        .map_err(query_failed)?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
                "description": r.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let name = required_str(params, "name")?;
    let code = optional_str(params, "code");
    let description = optional_str(params, "description");

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, description) VALUES(?, ?, ?, ?)",
        (&subject_id, &name, &code, &description),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_update(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let subject_id = required_str(params, "subjectId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    if let Some(name) = optional_str(params, "name") {
        conn.execute(
            "UPDATE subjects SET name = ? WHERE id = ?",
            (&name, &subject_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(code) = optional_str(params, "code") {
        conn.execute(
            "UPDATE subjects SET code = ? WHERE id = ?",
            (&code, &subject_id),
        )
        .map_err(update_failed)?;
    }
    if let Some(description) = optional_str(params, "description") {
        conn.execute(
            "UPDATE subjects SET description = ? WHERE id = ?",
            (&description, &subject_id),
        )
        .map_err(update_failed)?;
    }

    Ok(json!({ "subjectId": subject_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.create" => students_create(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "teachers.list" => teachers_list(state, &req.params),
        "teachers.create" => teachers_create(state, &req.params),
        "teachers.update" => teachers_update(state, &req.params),
        "subjects.list" => subjects_list(state, &req.params),
        "subjects.create" => subjects_create(state, &req.params),
        "subjects.update" => subjects_update(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
