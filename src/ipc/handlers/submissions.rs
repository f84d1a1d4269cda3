use crate::ipc::error::ok;
use crate::ipc::helpers::{
    insert_failed, is_past_due, now_ts, optional_str, query_failed, require_conn, required_f64,
    required_str, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::status::{can_edit_content, AssignmentStatus, SubmissionStatus};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

// Attachments are opaque references owned by the blob-transfer collaborator;
// only the id list is stored here, as a JSON array string.
fn parse_attachment_ids(params: &JsonValue) -> Result<Option<Vec<String>>, HandlerErr> {
    match params.get("attachmentIds") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    "attachmentIds must be an array of strings",
                ));
            };
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let Some(s) = item.as_str() else {
                    return Err(HandlerErr::new(
                        "bad_params",
                        "attachmentIds must be an array of strings",
                    ));
                };
                out.push(s.to_string());
            }
            Ok(Some(out))
        }
    }
}

fn parse_rubric_lines(params: &JsonValue) -> Result<Option<String>, HandlerErr> {
    match params.get("rubricLines") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            if !v.is_array() {
                return Err(HandlerErr::new(
                    "bad_params",
                    "rubricLines must be an array",
                ));
            }
            serde_json::to_string(v)
                .map(Some)
                .map_err(|e| HandlerErr::new("bad_params", e.to_string()))
        }
    }
}

struct AssignmentMeta {
    status: AssignmentStatus,
    due_at: String,
    total_marks: f64,
    allow_late: bool,
}

fn load_assignment(conn: &Connection, assignment_id: &str) -> Result<AssignmentMeta, HandlerErr> {
    let row: Option<(String, String, f64, i64)> = conn
        .query_row(
            "SELECT status, due_at, total_marks, allow_late FROM assignments WHERE id = ?",
            [assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(query_failed)?;
    let Some((status, due_at, total_marks, allow_late)) = row else {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    };
    let status = AssignmentStatus::parse(&status)
        .ok_or_else(|| HandlerErr::new("db_query_failed", "corrupt assignment status"))?;
    Ok(AssignmentMeta {
        status,
        due_at,
        total_marks,
        allow_late: allow_late != 0,
    })
}

fn submission_row_json(conn: &Connection, submission_id: &str) -> Result<JsonValue, HandlerErr> {
    conn.query_row(
        "SELECT id, assignment_id, student_id, content, attachment_ids, submitted_at,
                status, marks_awarded, feedback, rubric_lines, graded_by, graded_at
         FROM submissions WHERE id = ?",
        [submission_id],
        |r| {
            let attachments: String = r.get(4)?;
            let rubric: Option<String> = r.get(9)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "assignmentId": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "content": r.get::<_, Option<String>>(3)?,
                "attachmentIds": serde_json::from_str::<JsonValue>(&attachments)
                    .unwrap_or_else(|_| json!([])),
                "submittedAt": r.get::<_, String>(5)?,
                "status": r.get::<_, String>(6)?,
                "marksAwarded": r.get::<_, Option<f64>>(7)?,
                "feedback": r.get::<_, Option<String>>(8)?,
                "rubricLines": rubric
                    .map(|s| serde_json::from_str::<JsonValue>(&s).unwrap_or(JsonValue::Null)),
                "gradedBy": r.get::<_, Option<String>>(10)?,
                "gradedAt": r.get::<_, Option<String>>(11)?
            }))
        },
    )
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| HandlerErr::new("not_found", "submission not found"))
}

fn submissions_list(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
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

    let mut stmt = conn
        .prepare(
            "SELECT sb.id, sb.student_id, s.last_name, s.first_name, sb.submitted_at,
                    sb.status, sb.marks_awarded
             FROM submissions sb
             JOIN students s ON s.id = sb.student_id
             WHERE sb.assignment_id = ?
             ORDER BY sb.submitted_at",
        )
        .map_err(query_failed)?;
    let submissions = stmt
        .query_map([&assignment_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "submittedAt": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "marksAwarded": r.get::<_, Option<f64>>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "submissions": submissions }))
}

fn submissions_submit(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let assignment_id = required_str(params, "assignmentId")?;
    let student_id = required_str(params, "studentId")?;
    let content = optional_str(params, "content").filter(|s| !s.is_empty());
    let attachment_ids = parse_attachment_ids(params)?.unwrap_or_default();

    let assignment = load_assignment(conn, &assignment_id)?;
    if assignment.status != AssignmentStatus::Published {
        return Err(HandlerErr::new(
            "invalid_transition",
            format!(
                "assignment is {}, not open for submissions",
                assignment.status.as_str()
            ),
        ));
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

    if content.is_none() && attachment_ids.is_empty() {
        return Err(HandlerErr::new(
            "empty_submission",
            "a submission needs text content or at least one attachment",
        ));
    }

    let submitted_at = now_ts();
    let late = is_past_due(&assignment.due_at, &submitted_at);
    if late && !assignment.allow_late {
        return Err(HandlerErr::with_details(
            "past_due",
            "assignment is past due and does not allow late submissions",
            json!({ "dueAt": assignment.due_at }),
        ));
    }

    let submission_id = Uuid::new_v4().to_string();
    let attachments_json = serde_json::to_string(&attachment_ids)
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    conn.execute(
        "INSERT INTO submissions(id, assignment_id, student_id, content, attachment_ids,
                                 submitted_at, status)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &submission_id,
            &assignment_id,
            &student_id,
            &content,
            &attachments_json,
            &submitted_at,
            SubmissionStatus::Submitted.as_str(),
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({
        "submissionId": submission_id,
        "submittedAt": submitted_at,
        "late": late
    }))
}

fn submissions_update_content(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let submission_id = required_str(params, "submissionId")?;

    let row: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT status, content, attachment_ids FROM submissions WHERE id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(query_failed)?;
    let Some((status, current_content, current_attachments)) = row else {
        return Err(HandlerErr::new("not_found", "submission not found"));
    };
    let status = SubmissionStatus::parse(&status)
        .ok_or_else(|| HandlerErr::new("db_query_failed", "corrupt submission status"))?;

    // Pre-grading edits mutate the submitted record in place; there is no
    // separate draft state.
    if !can_edit_content(status) {
        return Err(HandlerErr::new(
            "invalid_transition",
            "a graded submission cannot be edited",
        ));
    }

    let content = match params.get("content") {
        None => current_content,
        Some(v) if v.is_null() => None,
        Some(_) => optional_str(params, "content").filter(|s| !s.is_empty()),
    };
    let attachment_ids = match parse_attachment_ids(params)? {
        None => serde_json::from_str::<Vec<String>>(&current_attachments).unwrap_or_default(),
        Some(ids) => ids,
    };

    if content.is_none() && attachment_ids.is_empty() {
        return Err(HandlerErr::new(
            "empty_submission",
            "a submission needs text content or at least one attachment",
        ));
    }

    let attachments_json = serde_json::to_string(&attachment_ids)
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    conn.execute(
        "UPDATE submissions SET content = ?, attachment_ids = ? WHERE id = ?",
        (&content, &attachments_json, &submission_id),
    )
    .map_err(update_failed)?;

    submission_row_json(conn, &submission_id).map(|submission| json!({ "submission": submission }))
}

fn submissions_grade(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let submission_id = required_str(params, "submissionId")?;
    let marks_awarded = required_f64(params, "marksAwarded")?;
    let feedback = optional_str(params, "feedback");
    let rubric_lines = parse_rubric_lines(params)?;
    let graded_by = optional_str(params, "gradedBy");

    let assignment_id: Option<String> = conn
        .query_row(
            "SELECT assignment_id FROM submissions WHERE id = ?",
            [&submission_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(assignment_id) = assignment_id else {
        return Err(HandlerErr::new("not_found", "submission not found"));
    };
    let assignment = load_assignment(conn, &assignment_id)?;

    if marks_awarded < 0.0 || marks_awarded > assignment.total_marks {
        return Err(HandlerErr::with_details(
            "out_of_range",
            format!(
                "marksAwarded must be between 0 and {}",
                assignment.total_marks
            ),
            json!({ "marksAwarded": marks_awarded, "totalMarks": assignment.total_marks }),
        ));
    }

    // Grading is overwritable: re-grading an already graded submission
    // replaces marks, feedback, and rubric lines and restamps the grader.
    let graded_at = now_ts();
    conn.execute(
        "UPDATE submissions
         SET status = ?, marks_awarded = ?, feedback = ?, rubric_lines = ?,
             graded_by = ?, graded_at = ?
         WHERE id = ?",
        (
            SubmissionStatus::Graded.as_str(),
            marks_awarded,
            &feedback,
            &rubric_lines,
            &graded_by,
            &graded_at,
            &submission_id,
        ),
    )
    .map_err(update_failed)?;

    submission_row_json(conn, &submission_id).map(|submission| json!({ "submission": submission }))
}

fn submissions_get(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let submission_id = required_str(params, "submissionId")?;
    submission_row_json(conn, &submission_id).map(|submission| json!({ "submission": submission }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "submissions.list" => submissions_list(state, &req.params),
        "submissions.get" => submissions_get(state, &req.params),
        "submissions.submit" => submissions_submit(state, &req.params),
        "submissions.updateContent" => submissions_update_content(state, &req.params),
        "submissions.grade" => submissions_grade(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
