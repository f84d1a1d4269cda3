use crate::grade::{aggregate, Component, Components};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    delete_failed, insert_failed, optional_f64, optional_str, query_failed, require_conn,
    required_str, tx_failed, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentKind {
    Assignment,
    Test,
    Exam,
    Rubric,
}

impl ComponentKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "assignment" => Some(Self::Assignment),
            "test" => Some(Self::Test),
            "exam" => Some(Self::Exam),
            "rubric" => Some(Self::Rubric),
            _ => None,
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Assignment => "gradebook_assignments",
            Self::Test => "gradebook_tests",
            Self::Exam => "gradebook_exams",
            Self::Rubric => "gradebook_rubrics",
        }
    }
}

fn parse_kind(params: &JsonValue) -> Result<ComponentKind, HandlerErr> {
    let s = required_str(params, "kind")?;
    ComponentKind::parse(&s)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown component kind '{}'", s)))
}

fn parse_term(params: &JsonValue) -> Result<i64, HandlerErr> {
    let term = params
        .get("term")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "term must be 1, 2, or 3"))?;
    if !(1..=3).contains(&term) {
        return Err(HandlerErr::new("bad_params", "term must be 1, 2, or 3"));
    }
    Ok(term)
}

fn entry_exists(conn: &Connection, entry_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM gradebook_entries WHERE id = ?",
        [entry_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(query_failed)
}

fn load_components(conn: &Connection, entry_id: &str) -> Result<Components, HandlerErr> {
    let mut components = Components::default();
    for (table, list) in [
        ("gradebook_assignments", &mut components.assignments),
        ("gradebook_tests", &mut components.tests),
        ("gradebook_exams", &mut components.exams),
        ("gradebook_rubrics", &mut components.rubrics),
    ] {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT marks, {} FROM {} WHERE entry_id = ?",
                if table == "gradebook_rubrics" {
                    "NULL"
                } else {
                    "weight"
                },
                table
            ))
            .map_err(query_failed)?;
        let rows = stmt
            .query_map([entry_id], |r| {
                Ok(Component {
                    marks: r.get::<_, Option<f64>>(0)?.unwrap_or(0.0),
                    weight: r.get::<_, Option<f64>>(1)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_failed)?;
        *list = rows;
    }
    Ok(components)
}

/// Re-derive total and grade from the component lists and persist them.
/// Runs after every component mutation, inside the caller's transaction.
fn recompute_entry(conn: &Connection, entry_id: &str) -> Result<JsonValue, HandlerErr> {
    let components = load_components(conn, entry_id)?;
    let agg = aggregate(&components);
    let final_grade = agg.final_grade.map(|g| g.as_str());
    conn.execute(
        "UPDATE gradebook_entries SET total_marks = ?, final_grade = ? WHERE id = ?",
        (agg.total_marks, final_grade, entry_id),
    )
    .map_err(update_failed)?;
    Ok(json!({
        "totalMarks": agg.total_marks,
        "finalGrade": final_grade
    }))
}

fn create_entry(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let subject_id = required_str(params, "subjectId")?;
    let academic_year = required_str(params, "academicYear")?;
    let term = parse_term(params)?;
    let remarks = optional_str(params, "remarks");

    for (table, id, label) in [
        ("students", &student_id, "student"),
        ("classes", &class_id, "class"),
        ("subjects", &subject_id, "subject"),
    ] {
        let exists: Option<i64> = conn
            .query_row(&format!("SELECT 1 FROM {} WHERE id = ?", table), [id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(query_failed)?;
        if exists.is_none() {
            return Err(HandlerErr::new("not_found", format!("{} not found", label)));
        }
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM gradebook_entries
             WHERE student_id = ? AND class_id = ? AND subject_id = ?
               AND academic_year = ? AND term = ?",
            (&student_id, &class_id, &subject_id, &academic_year, term),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if let Some(existing_id) = duplicate {
        return Err(HandlerErr::with_details(
            "conflict",
            "a gradebook entry already exists for this student, subject, year, and term",
            json!({ "entryId": existing_id }),
        ));
    }

    let entry_id = Uuid::new_v4().to_string();
    // Derived fields start at zero/unset; the first component write computes
    // them.
    conn.execute(
        "INSERT INTO gradebook_entries(id, student_id, class_id, subject_id, academic_year,
                                       term, total_marks, final_grade, remarks)
         VALUES(?, ?, ?, ?, ?, ?, 0, NULL, ?)",
        (
            &entry_id,
            &student_id,
            &class_id,
            &subject_id,
            &academic_year,
            term,
            &remarks,
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({
        "entryId": entry_id,
        "totalMarks": 0.0,
        "finalGrade": JsonValue::Null
    }))
}

fn get_entry(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let entry_id = required_str(params, "entryId")?;

    let entry: Option<JsonValue> = conn
        .query_row(
            "SELECT e.id, e.student_id, s.last_name, s.first_name, e.class_id, e.subject_id,
                    e.academic_year, e.term, e.total_marks, e.final_grade, e.remarks
             FROM gradebook_entries e
             JOIN students s ON s.id = e.student_id
             WHERE e.id = ?",
            [&entry_id],
            |r| {
                let last: String = r.get(2)?;
                let first: String = r.get(3)?;
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "displayName": format!("{}, {}", last, first),
                    "classId": r.get::<_, String>(4)?,
                    "subjectId": r.get::<_, String>(5)?,
                    "academicYear": r.get::<_, String>(6)?,
                    "term": r.get::<_, i64>(7)?,
                    "totalMarks": r.get::<_, f64>(8)?,
                    "finalGrade": r.get::<_, Option<String>>(9)?,
                    "remarks": r.get::<_, Option<String>>(10)?
                }))
            },
        )
        .optional()
        .map_err(query_failed)?;
    let Some(mut entry) = entry else {
        return Err(HandlerErr::new("not_found", "gradebook entry not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, assignment_id, marks, weight, feedback
             FROM gradebook_assignments WHERE entry_id = ?",
        )
        .map_err(query_failed)?;
    let assignments = stmt
        .query_map([&entry_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "assignmentId": r.get::<_, Option<String>>(1)?,
                "marks": r.get::<_, f64>(2)?,
                "weight": r.get::<_, Option<f64>>(3)?,
                "feedback": r.get::<_, Option<String>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, marks, test_date, weight
             FROM gradebook_tests WHERE entry_id = ?",
        )
        .map_err(query_failed)?;
    let tests = stmt
        .query_map([&entry_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "marks": r.get::<_, f64>(2)?,
                "date": r.get::<_, Option<String>>(3)?,
                "weight": r.get::<_, Option<f64>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, marks, exam_date, weight
             FROM gradebook_exams WHERE entry_id = ?",
        )
        .map_err(query_failed)?;
    let exams = stmt
        .query_map([&entry_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "marks": r.get::<_, f64>(2)?,
                "date": r.get::<_, Option<String>>(3)?,
                "weight": r.get::<_, Option<f64>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, criteria, marks, comment
             FROM gradebook_rubrics WHERE entry_id = ?",
        )
        .map_err(query_failed)?;
    let rubrics = stmt
        .query_map([&entry_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "criteria": r.get::<_, String>(1)?,
                "marks": r.get::<_, f64>(2)?,
                "comment": r.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    entry["assignments"] = json!(assignments);
    entry["tests"] = json!(tests);
    entry["exams"] = json!(exams);
    entry["rubrics"] = json!(rubrics);
    Ok(json!({ "entry": entry }))
}

fn list_entries(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let class_id = required_str(params, "classId")?;
    let subject_id = optional_str(params, "subjectId");
    let academic_year = optional_str(params, "academicYear");
    let term = params.get("term").and_then(|v| v.as_i64());

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.student_id, s.last_name, s.first_name, e.subject_id,
                    e.academic_year, e.term, e.total_marks, e.final_grade
             FROM gradebook_entries e
             JOIN students s ON s.id = e.student_id
             WHERE e.class_id = ?1
               AND (?2 IS NULL OR e.subject_id = ?2)
               AND (?3 IS NULL OR e.academic_year = ?3)
               AND (?4 IS NULL OR e.term = ?4)
             ORDER BY s.last_name, s.first_name, e.term",
        )
        .map_err(query_failed)?;
    let entries = stmt
        .query_map((&class_id, &subject_id, &academic_year, &term), |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "subjectId": r.get::<_, String>(4)?,
                "academicYear": r.get::<_, String>(5)?,
                "term": r.get::<_, i64>(6)?,
                "totalMarks": r.get::<_, f64>(7)?,
                "finalGrade": r.get::<_, Option<String>>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "entries": entries }))
}

fn set_remarks(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let entry_id = required_str(params, "entryId")?;
    let remarks = optional_str(params, "remarks");

    if !entry_exists(conn, &entry_id)? {
        return Err(HandlerErr::new("not_found", "gradebook entry not found"));
    }
    conn.execute(
        "UPDATE gradebook_entries SET remarks = ? WHERE id = ?",
        (&remarks, &entry_id),
    )
    .map_err(update_failed)?;
    Ok(json!({ "entryId": entry_id }))
}

fn add_component(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let entry_id = required_str(params, "entryId")?;
    let kind = parse_kind(params)?;
    // Absent marks default to zero; a line can exist before it is scored.
    let marks = optional_f64(params, "marks")?.unwrap_or(0.0);
    let weight = optional_f64(params, "weight")?;

    if !entry_exists(conn, &entry_id)? {
        return Err(HandlerErr::new("not_found", "gradebook entry not found"));
    }

    let component_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    match kind {
        ComponentKind::Assignment => {
            let assignment_id = optional_str(params, "assignmentId");
            let feedback = optional_str(params, "feedback");
            tx.execute(
                "INSERT INTO gradebook_assignments(id, entry_id, assignment_id, marks, weight, feedback)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &component_id,
                    &entry_id,
                    &assignment_id,
                    marks,
                    weight,
                    &feedback,
                ),
            )
            .map_err(insert_failed)?;
        }
        ComponentKind::Test => {
            let name = required_str(params, "name")?;
            let date = optional_str(params, "date");
            tx.execute(
                "INSERT INTO gradebook_tests(id, entry_id, name, marks, test_date, weight)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&component_id, &entry_id, &name, marks, &date, weight),
            )
            .map_err(insert_failed)?;
        }
        ComponentKind::Exam => {
            let name = required_str(params, "name")?;
            let date = optional_str(params, "date");
            tx.execute(
                "INSERT INTO gradebook_exams(id, entry_id, name, marks, exam_date, weight)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&component_id, &entry_id, &name, marks, &date, weight),
            )
            .map_err(insert_failed)?;
        }
        ComponentKind::Rubric => {
            let criteria = required_str(params, "criteria")?;
            let comment = optional_str(params, "comment");
            tx.execute(
                "INSERT INTO gradebook_rubrics(id, entry_id, criteria, marks, comment)
                 VALUES(?, ?, ?, ?, ?)",
                (&component_id, &entry_id, &criteria, marks, &comment),
            )
            .map_err(insert_failed)?;
        }
    }
    let derived = recompute_entry(&tx, &entry_id)?;
    tx.commit().map_err(tx_failed)?;

    Ok(json!({
        "componentId": component_id,
        "totalMarks": derived["totalMarks"],
        "finalGrade": derived["finalGrade"]
    }))
}

fn update_component(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let component_id = required_str(params, "componentId")?;
    let kind = parse_kind(params)?;
    let table = kind.table();

    let entry_id: Option<String> = conn
        .query_row(
            &format!("SELECT entry_id FROM {} WHERE id = ?", table),
            [&component_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(entry_id) = entry_id else {
        return Err(HandlerErr::new("not_found", "component not found"));
    };

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    if let Some(marks) = optional_f64(params, "marks")? {
        tx.execute(
            &format!("UPDATE {} SET marks = ? WHERE id = ?", table),
            (marks, &component_id),
        )
        .map_err(update_failed)?;
    }
    if kind != ComponentKind::Rubric {
        if let Some(weight) = optional_f64(params, "weight")? {
            tx.execute(
                &format!("UPDATE {} SET weight = ? WHERE id = ?", table),
                (weight, &component_id),
            )
            .map_err(update_failed)?;
        }
    }
    match kind {
        ComponentKind::Assignment => {
            if let Some(feedback) = optional_str(params, "feedback") {
                tx.execute(
                    "UPDATE gradebook_assignments SET feedback = ? WHERE id = ?",
                    (&feedback, &component_id),
                )
                .map_err(update_failed)?;
            }
        }
        ComponentKind::Test => {
            if let Some(name) = optional_str(params, "name") {
                tx.execute(
                    "UPDATE gradebook_tests SET name = ? WHERE id = ?",
                    (&name, &component_id),
                )
                .map_err(update_failed)?;
            }
            if let Some(date) = optional_str(params, "date") {
                tx.execute(
                    "UPDATE gradebook_tests SET test_date = ? WHERE id = ?",
                    (&date, &component_id),
                )
                .map_err(update_failed)?;
            }
        }
        ComponentKind::Exam => {
            if let Some(name) = optional_str(params, "name") {
                tx.execute(
                    "UPDATE gradebook_exams SET name = ? WHERE id = ?",
                    (&name, &component_id),
                )
                .map_err(update_failed)?;
            }
            if let Some(date) = optional_str(params, "date") {
                tx.execute(
                    "UPDATE gradebook_exams SET exam_date = ? WHERE id = ?",
                    (&date, &component_id),
                )
                .map_err(update_failed)?;
            }
        }
        ComponentKind::Rubric => {
            if let Some(criteria) = optional_str(params, "criteria") {
                tx.execute(
                    "UPDATE gradebook_rubrics SET criteria = ? WHERE id = ?",
                    (&criteria, &component_id),
                )
                .map_err(update_failed)?;
            }
            if let Some(comment) = optional_str(params, "comment") {
                tx.execute(
                    "UPDATE gradebook_rubrics SET comment = ? WHERE id = ?",
                    (&comment, &component_id),
                )
                .map_err(update_failed)?;
            }
        }
    }
    let derived = recompute_entry(&tx, &entry_id)?;
    tx.commit().map_err(tx_failed)?;

    Ok(json!({
        "componentId": component_id,
        "totalMarks": derived["totalMarks"],
        "finalGrade": derived["finalGrade"]
    }))
}

fn remove_component(state: &AppState, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let conn = require_conn(state)?;
    let component_id = required_str(params, "componentId")?;
    let kind = parse_kind(params)?;
    let table = kind.table();

    let entry_id: Option<String> = conn
        .query_row(
            &format!("SELECT entry_id FROM {} WHERE id = ?", table),
            [&component_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    // Idempotent: already-removed components are a success, and there is
    // nothing to recompute.
    let Some(entry_id) = entry_id else {
        return Ok(json!({ "removed": false }));
    };

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    tx.execute(
        &format!("DELETE FROM {} WHERE id = ?", table),
        [&component_id],
    )
    .map_err(delete_failed)?;
    let derived = recompute_entry(&tx, &entry_id)?;
    tx.commit().map_err(tx_failed)?;

    Ok(json!({
        "removed": true,
        "totalMarks": derived["totalMarks"],
        "finalGrade": derived["finalGrade"]
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "gradebook.createEntry" => create_entry(state, &req.params),
        "gradebook.getEntry" => get_entry(state, &req.params),
        "gradebook.listEntries" => list_entries(state, &req.params),
        "gradebook.setRemarks" => set_remarks(state, &req.params),
        "gradebook.addComponent" => add_component(state, &req.params),
        "gradebook.updateComponent" => update_component(state, &req.params),
        "gradebook.removeComponent" => remove_component(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
