use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoolhubd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolhubd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Workspace with one class, one linked subject, one student, one empty
/// gradebook entry. Returns the entry id.
fn setup_entry(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "setup-2",
        "classes.create",
        json!({ "name": "Form 2 Red", "code": "F2R" }),
    );
    let class_id = class["class"]["id"].as_str().expect("classId").to_string();
    let subject = request_ok(
        stdin,
        reader,
        "setup-3",
        "subjects.create",
        json!({ "name": "Mathematics" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();
    let _ = request_ok(
        stdin,
        reader,
        "setup-4",
        "enrollment.proposeSubject",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );
    let student = request_ok(
        stdin,
        reader,
        "setup-5",
        "students.create",
        json!({ "lastName": "Mensah", "firstName": "Akosua" }),
    );
    let entry = request_ok(
        stdin,
        reader,
        "setup-6",
        "gradebook.createEntry",
        json!({
            "studentId": student["studentId"].as_str().expect("studentId"),
            "classId": class_id,
            "subjectId": subject_id,
            "academicYear": "2026/2027",
            "term": 1
        }),
    );
    entry["entryId"].as_str().expect("entryId").to_string()
}

#[test]
fn total_is_a_straight_sum_across_component_lists() {
    let workspace = temp_dir("schoolhub-aggregation-sum");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let entry_id = setup_entry(&mut stdin, &mut reader, &workspace);

    // Fresh entry: total zero, grade unset until a component exists.
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "gradebook.getEntry",
        json!({ "entryId": entry_id }),
    );
    assert_eq!(fetched["entry"]["totalMarks"].as_f64(), Some(0.0));
    assert!(fetched["entry"]["finalGrade"].is_null());

    // assignments 20 + 15, tests 30, rubrics 10 -> 75 -> C.
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gradebook.addComponent",
        json!({ "entryId": entry_id, "kind": "assignment", "marks": 20 }),
    );
    assert_eq!(first["totalMarks"].as_f64(), Some(20.0));
    assert_eq!(first["finalGrade"].as_str(), Some("F"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "gradebook.addComponent",
        json!({ "entryId": entry_id, "kind": "assignment", "marks": 15 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gradebook.addComponent",
        json!({ "entryId": entry_id, "kind": "test", "name": "Midterm", "marks": 30 }),
    );
    let last = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "gradebook.addComponent",
        json!({ "entryId": entry_id, "kind": "rubric", "criteria": "Class participation", "marks": 10 }),
    );
    assert_eq!(last["totalMarks"].as_f64(), Some(75.0));
    assert_eq!(last["finalGrade"].as_str(), Some("C"));

    // Weights are stored but never applied to the sum.
    let weighted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "gradebook.addComponent",
        json!({
            "entryId": entry_id,
            "kind": "exam",
            "name": "Final",
            "marks": 14,
            "weight": 300
        }),
    );
    assert_eq!(weighted["totalMarks"].as_f64(), Some(89.0));
    assert_eq!(weighted["finalGrade"].as_str(), Some("B"));

    // Deterministic: reading the entry twice yields identical derived values.
    let a = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "gradebook.getEntry",
        json!({ "entryId": entry_id }),
    );
    let b = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "gradebook.getEntry",
        json!({ "entryId": entry_id }),
    );
    assert_eq!(a["entry"]["totalMarks"], b["entry"]["totalMarks"]);
    assert_eq!(a["entry"]["finalGrade"], b["entry"]["finalGrade"]);
    assert_eq!(a["entry"]["exams"][0]["weight"].as_f64(), Some(300.0));
}

#[test]
fn boundary_grades_and_recompute_on_edit_and_remove() {
    let workspace = temp_dir("schoolhub-aggregation-boundary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let entry_id = setup_entry(&mut stdin, &mut reader, &workspace);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "gradebook.addComponent",
        json!({ "entryId": entry_id, "kind": "exam", "name": "Final", "marks": 89 }),
    );
    let component_id = added["componentId"].as_str().expect("componentId").to_string();
    assert_eq!(added["totalMarks"].as_f64(), Some(89.0));
    assert_eq!(added["finalGrade"].as_str(), Some("B"));

    // 89 -> B, 90 -> A: the threshold is inclusive.
    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gradebook.updateComponent",
        json!({ "componentId": component_id, "kind": "exam", "marks": 90 }),
    );
    assert_eq!(edited["totalMarks"].as_f64(), Some(90.0));
    assert_eq!(edited["finalGrade"].as_str(), Some("A"));

    // A remaining zero-mark line still earns a grade: F, not unset.
    let zero_line = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "gradebook.addComponent",
        json!({ "entryId": entry_id, "kind": "test", "name": "Quiz 1" }),
    );
    assert_eq!(zero_line["totalMarks"].as_f64(), Some(90.0));

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gradebook.removeComponent",
        json!({ "componentId": component_id, "kind": "exam" }),
    );
    assert_eq!(removed["removed"].as_bool(), Some(true));
    assert_eq!(removed["totalMarks"].as_f64(), Some(0.0));
    assert_eq!(removed["finalGrade"].as_str(), Some("F"));

    // Component removal is idempotent, like link removal.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "gradebook.removeComponent",
        json!({ "componentId": component_id, "kind": "exam" }),
    );
    assert_eq!(again["removed"].as_bool(), Some(false));
}

#[test]
fn entry_uniqueness_and_term_validation() {
    let workspace = temp_dir("schoolhub-entry-conflicts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Form 3 Gold", "code": "F3G" }),
    );
    let class_id = class["class"]["id"].as_str().expect("classId").to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "English" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "lastName": "Asare", "firstName": "Efua" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    let make_entry = |term: i64| {
        json!({
            "studentId": student_id,
            "classId": class_id,
            "subjectId": subject_id,
            "academicYear": "2026/2027",
            "term": term
        })
    };

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "gradebook.createEntry",
        make_entry(1),
    );
    let duplicate = request(
        &mut stdin,
        &mut reader,
        "6",
        "gradebook.createEntry",
        make_entry(1),
    );
    assert_eq!(duplicate["ok"].as_bool(), Some(false));
    assert_eq!(duplicate["error"]["code"].as_str(), Some("conflict"));

    // A different term is a different entry.
    let term2 = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "gradebook.createEntry",
        make_entry(2),
    );
    assert!(term2["entryId"].is_string());

    let bad_term = request(
        &mut stdin,
        &mut reader,
        "8",
        "gradebook.createEntry",
        make_entry(4),
    );
    assert_eq!(bad_term["ok"].as_bool(), Some(false));
    assert_eq!(bad_term["error"]["code"].as_str(), Some("bad_params"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "gradebook.listEntries",
        json!({ "classId": class_id, "term": 2 }),
    );
    assert_eq!(listed["entries"].as_array().map(|a| a.len()), Some(1));
}
