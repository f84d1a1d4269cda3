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

fn create_published(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    subject_id: &str,
    title: &str,
    allow_late: bool,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("mk-{}", title),
        "assignments.create",
        json!({
            "classId": class_id,
            "subjectId": subject_id,
            "title": title,
            "dueAt": "2020-01-01T00:00:00Z",
            "totalMarks": 10,
            "allowLate": allow_late
        }),
    );
    let assignment_id = created["assignment"]["id"].as_str().expect("id").to_string();
    let _ = request_ok(
        stdin,
        reader,
        &format!("pub-{}", title),
        "assignments.publish",
        json!({ "assignmentId": assignment_id }),
    );
    assignment_id
}

#[test]
fn past_due_blocks_unless_late_submissions_allowed() {
    let workspace = temp_dir("schoolhub-late-policy");
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
        json!({ "name": "Form 1 Blue", "code": "F1B" }),
    );
    let class_id = class["class"]["id"].as_str().expect("classId").to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "Science" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollment.proposeSubject",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "lastName": "Addo", "firstName": "Yaw" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    // Strict deadline: past due is a hard stop.
    let strict = create_published(&mut stdin, &mut reader, &class_id, &subject_id, "strict", false);
    let blocked = request(
        &mut stdin,
        &mut reader,
        "6",
        "submissions.submit",
        json!({ "assignmentId": strict, "studentId": student_id, "content": "late work" }),
    );
    assert_eq!(blocked["ok"].as_bool(), Some(false));
    assert_eq!(blocked["error"]["code"].as_str(), Some("past_due"));

    // Lenient deadline: accepted, flagged late for the UI to surface.
    let lenient =
        create_published(&mut stdin, &mut reader, &class_id, &subject_id, "lenient", true);
    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "submissions.submit",
        json!({ "assignmentId": lenient, "studentId": student_id, "content": "late work" }),
    );
    assert_eq!(accepted["late"].as_bool(), Some(true));
    assert!(accepted["submissionId"].is_string());
}
