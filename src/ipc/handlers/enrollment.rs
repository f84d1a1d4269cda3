use crate::ipc::error::ok;
use crate::ipc::helpers::{
    delete_failed, insert_failed, now_ts, optional_bool, optional_str, query_failed, require_conn,
    required_str, tx_failed, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::status::{decide_link, EnrollmentType, LinkStatus};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_failed)
}

fn subject_link_id(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM subject_links WHERE class_id = ? AND subject_id = ?",
        (class_id, subject_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(query_failed)
}

fn parse_initial_status(params: &JsonValue) -> Result<LinkStatus, HandlerErr> {
    // Admin-initiated adds arrive pre-approved; self-service flows start
    // pending. The caller picks; the default is the conservative one.
    match optional_str(params, "status") {
        None => Ok(LinkStatus::Pending),
        Some(s) => LinkStatus::parse(&s)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown status '{}'", s))),
    }
}

fn parse_decision(params: &JsonValue) -> Result<LinkStatus, HandlerErr> {
    let s = required_str(params, "status")?;
    LinkStatus::parse(&s)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown status '{}'", s)))
}

fn propose_subject(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let subject_id = required_str(params, "subjectId")?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let subject: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if subject.is_none() {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    if subject_link_id(conn, &class_id, &subject_id)?.is_some() {
        return Err(HandlerErr::with_details(
            "duplicate_link",
            "class is already linked to this subject",
            json!({ "classId": class_id, "subjectId": subject_id }),
        ));
    }

    let link_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subject_links(id, class_id, subject_id) VALUES(?, ?, ?)",
        (&link_id, &class_id, &subject_id),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "linkId": link_id }))
}

fn propose_student(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;
    let status = parse_initial_status(params)?;
    let enrollment_type = match optional_str(params, "enrollmentType") {
        None => EnrollmentType::New,
        Some(s) => EnrollmentType::parse(&s).ok_or_else(|| {
            HandlerErr::new("bad_params", format!("unknown enrollmentType '{}'", s))
        })?,
    };
    let enrolled_by = optional_str(params, "enrolledBy");

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let student: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if student.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    // Any existing link blocks, rejected included. A rejected student is not
    // silently re-proposed; the old link must be removed first.
    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM student_links WHERE class_id = ? AND student_id = ?",
            (&class_id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if let Some(existing_status) = existing {
        return Err(HandlerErr::with_details(
            "duplicate_link",
            "student is already linked to this class",
            json!({ "existingStatus": existing_status }),
        ));
    }

    let link_id = Uuid::new_v4().to_string();
    let enrolled_at = now_ts();
    conn.execute(
        "INSERT INTO student_links(id, class_id, student_id, status, enrollment_type,
                                   enrolled_at, enrolled_by)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &link_id,
            &class_id,
            &student_id,
            status.as_str(),
            enrollment_type.as_str(),
            &enrolled_at,
            &enrolled_by,
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({
        "linkId": link_id,
        "status": status.as_str(),
        "enrollmentType": enrollment_type.as_str(),
        "enrolledAt": enrolled_at
    }))
}

fn propose_teacher(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let subject_id = required_str(params, "subjectId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let status = parse_initial_status(params)?;
    let is_lead = optional_bool(params, "isLeadTeacher", false)?;
    let assigned_by = optional_str(params, "assignedBy");

    let Some(sl_id) = subject_link_id(conn, &class_id, &subject_id)? else {
        return Err(HandlerErr::new(
            "not_found",
            "class is not linked to this subject",
        ));
    };
    let teacher: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if teacher.is_none() {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM teacher_links WHERE subject_link_id = ? AND teacher_id = ?",
            (&sl_id, &teacher_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if let Some(existing_status) = existing {
        return Err(HandlerErr::with_details(
            "duplicate_link",
            "teacher is already linked to this subject in this class",
            json!({ "existingStatus": existing_status }),
        ));
    }

    let link_id = Uuid::new_v4().to_string();
    // Approval timestamp is stamped whenever the link enters approved,
    // including approved-at-creation admin adds.
    let approved_at = if status == LinkStatus::Approved {
        Some(now_ts())
    } else {
        None
    };
    conn.execute(
        "INSERT INTO teacher_links(id, subject_link_id, teacher_id, status,
                                   is_lead_teacher, assigned_by, approved_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &link_id,
            &sl_id,
            &teacher_id,
            status.as_str(),
            is_lead as i64,
            &assigned_by,
            &approved_at,
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({
        "linkId": link_id,
        "status": status.as_str(),
        "isLeadTeacher": is_lead,
        "approvedAt": approved_at
    }))
}

fn decide_student(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let link_id = required_str(params, "linkId")?;
    let requested = parse_decision(params)?;

    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM student_links WHERE id = ?",
            [&link_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(current) = current else {
        return Err(HandlerErr::new("not_found", "student link not found"));
    };
    let current = LinkStatus::parse(&current)
        .ok_or_else(|| HandlerErr::new("db_query_failed", "corrupt link status"))?;

    let next = decide_link(current, requested)
        .map_err(|e| HandlerErr::new("invalid_transition", e.message))?;

    conn.execute(
        "UPDATE student_links SET status = ? WHERE id = ?",
        (next.as_str(), &link_id),
    )
    .map_err(update_failed)?;

    Ok(json!({ "linkId": link_id, "status": next.as_str() }))
}

fn decide_teacher(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let link_id = required_str(params, "linkId")?;
    let requested = parse_decision(params)?;

    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM teacher_links WHERE id = ?",
            [&link_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(current) = current else {
        return Err(HandlerErr::new("not_found", "teacher link not found"));
    };
    let current = LinkStatus::parse(&current)
        .ok_or_else(|| HandlerErr::new("db_query_failed", "corrupt link status"))?;

    let next = decide_link(current, requested)
        .map_err(|e| HandlerErr::new("invalid_transition", e.message))?;

    let approved_at = if next == LinkStatus::Approved {
        Some(now_ts())
    } else {
        None
    };
    conn.execute(
        "UPDATE teacher_links SET status = ?, approved_at = ? WHERE id = ?",
        (next.as_str(), &approved_at, &link_id),
    )
    .map_err(update_failed)?;

    Ok(json!({
        "linkId": link_id,
        "status": next.as_str(),
        "approvedAt": approved_at
    }))
}

fn remove_student(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let link_id = required_str(params, "linkId")?;

    // Idempotent by contract: a double-submit from the UI must not error.
    let n = conn
        .execute("DELETE FROM student_links WHERE id = ?", [&link_id])
        .map_err(delete_failed)?;
    Ok(json!({ "removed": n > 0 }))
}

fn remove_teacher(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let link_id = required_str(params, "linkId")?;

    let n = conn
        .execute("DELETE FROM teacher_links WHERE id = ?", [&link_id])
        .map_err(delete_failed)?;
    Ok(json!({ "removed": n > 0 }))
}

fn remove_subject(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let link_id = required_str(params, "linkId")?;

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    tx.execute(
        "DELETE FROM teacher_links WHERE subject_link_id = ?",
        [&link_id],
    )
    .map_err(delete_failed)?;
    let n = tx
        .execute("DELETE FROM subject_links WHERE id = ?", [&link_id])
        .map_err(delete_failed)?;
    tx.commit().map_err(tx_failed)?;

    Ok(json!({ "removed": n > 0 }))
}

fn list_students(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT sl.id, sl.student_id, s.last_name, s.first_name, sl.status,
                    sl.enrollment_type, sl.enrolled_at, sl.enrolled_by
             FROM student_links sl
             JOIN students s ON s.id = sl.student_id
             WHERE sl.class_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(query_failed)?;
    let links = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "linkId": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "status": r.get::<_, String>(4)?,
                "enrollmentType": r.get::<_, String>(5)?,
                "enrolledAt": r.get::<_, String>(6)?,
                "enrolledBy": r.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "students": links }))
}

fn list_subjects(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT sl.id, sl.subject_id, sj.name
             FROM subject_links sl
             JOIN subjects sj ON sj.id = sl.subject_id
             WHERE sl.class_id = ?
             ORDER BY sj.name",
        )
        .map_err(query_failed)?;
    let raw_links = stmt
        .query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let mut tl_stmt = conn
        .prepare(
            "SELECT tl.id, tl.teacher_id, t.last_name, t.first_name, tl.status,
                    tl.is_lead_teacher, tl.assigned_by, tl.approved_at
             FROM teacher_links tl
             JOIN teachers t ON t.id = tl.teacher_id
             WHERE tl.subject_link_id = ?
             ORDER BY t.last_name, t.first_name",
        )
        .map_err(query_failed)?;

    let mut links = Vec::with_capacity(raw_links.len());
    for (link_id, subject_id, subject_name) in raw_links {
        let teachers = tl_stmt
            .query_map([&link_id], |r| {
                let last: String = r.get(2)?;
                let first: String = r.get(3)?;
                Ok(json!({
                    "linkId": r.get::<_, String>(0)?,
                    "teacherId": r.get::<_, String>(1)?,
                    "displayName": format!("{}, {}", last, first),
                    "status": r.get::<_, String>(4)?,
                    "isLeadTeacher": r.get::<_, i64>(5)? != 0,
                    "assignedBy": r.get::<_, Option<String>>(6)?,
                    "approvedAt": r.get::<_, Option<String>>(7)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_failed)?;
        links.push(json!({
            "linkId": link_id,
            "subjectId": subject_id,
            "subjectName": subject_name,
            "teacherLinks": teachers
        }));
    }

    Ok(json!({ "subjects": links }))
}

// Availability is status-agnostic on purpose: a rejected link still blocks
// re-adding until it is explicitly removed.

fn available_students(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name
             FROM students s
             WHERE s.active = 1
               AND s.id NOT IN (
                 SELECT sl.student_id FROM student_links sl WHERE sl.class_id = ?
               )
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(query_failed)?;
    let students = stmt
        .query_map([&class_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "students": students }))
}

fn available_subjects(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT sj.id, sj.name
             FROM subjects sj
             WHERE sj.id NOT IN (
               SELECT sl.subject_id FROM subject_links sl WHERE sl.class_id = ?
             )
             ORDER BY sj.name",
        )
        .map_err(query_failed)?;
    let subjects = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "subjectId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "subjects": subjects }))
}

fn available_teachers(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let subject_id = required_str(params, "subjectId")?;

    let Some(sl_id) = subject_link_id(conn, &class_id, &subject_id)? else {
        return Err(HandlerErr::new(
            "not_found",
            "class is not linked to this subject",
        ));
    };

    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.last_name, t.first_name
             FROM teachers t
             WHERE t.active = 1
               AND t.id NOT IN (
                 SELECT tl.teacher_id FROM teacher_links tl WHERE tl.subject_link_id = ?
               )
             ORDER BY t.last_name, t.first_name",
        )
        .map_err(query_failed)?;
    let teachers = stmt
        .query_map([&sl_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "teacherId": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "teachers": teachers }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "enrollment.proposeSubject" => propose_subject(state, &req.params),
        "enrollment.proposeStudent" => propose_student(state, &req.params),
        "enrollment.proposeTeacher" => propose_teacher(state, &req.params),
        "enrollment.decideStudent" => decide_student(state, &req.params),
        "enrollment.decideTeacher" => decide_teacher(state, &req.params),
        "enrollment.removeStudent" => remove_student(state, &req.params),
        "enrollment.removeTeacher" => remove_teacher(state, &req.params),
        "enrollment.removeSubject" => remove_subject(state, &req.params),
        "enrollment.listStudents" => list_students(state, &req.params),
        "enrollment.listSubjects" => list_subjects(state, &req.params),
        "enrollment.availableStudents" => available_students(state, &req.params),
        "enrollment.availableSubjects" => available_subjects(state, &req.params),
        "enrollment.availableTeachers" => available_teachers(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
