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

fn ids_of(result: &serde_json::Value, list: &str, key: &str) -> Vec<String> {
    result[list]
        .as_array()
        .expect("list")
        .iter()
        .map(|v| v[key].as_str().expect(key).to_string())
        .collect()
}

#[test]
fn availability_excludes_linked_rows_in_any_status() {
    let workspace = temp_dir("schoolhub-availability");
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
        json!({ "name": "Form 2 Gold", "code": "F2G" }),
    );
    let class_id = class["class"]["id"].as_str().expect("classId").to_string();

    let mut student_ids = Vec::new();
    for (i, (last, first)) in [("Mensah", "Akosua"), ("Addo", "Yaw"), ("Asare", "Efua")]
        .iter()
        .enumerate()
    {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "lastName": last, "firstName": first }),
        );
        student_ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }

    // One approved, one rejected; both must disappear from the pool.
    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollment.proposeStudent",
        json!({ "classId": class_id, "studentId": student_ids[0], "status": "approved" }),
    );
    assert_eq!(approved["status"].as_str(), Some("approved"));
    let rejected_link = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollment.proposeStudent",
        json!({ "classId": class_id, "studentId": student_ids[1] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollment.decideStudent",
        json!({
            "linkId": rejected_link["linkId"].as_str().expect("linkId"),
            "status": "rejected"
        }),
    );

    let available = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollment.availableStudents",
        json!({ "classId": class_id }),
    );
    let available_ids = ids_of(&available, "students", "studentId");
    assert_eq!(available_ids, vec![student_ids[2].clone()]);

    // Subjects: a linked subject leaves the pool, others stay.
    let math = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({ "name": "Mathematics" }),
    );
    let math_id = math["subjectId"].as_str().expect("subjectId").to_string();
    let science = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.create",
        json!({ "name": "Science" }),
    );
    let science_id = science["subjectId"].as_str().expect("subjectId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "enrollment.proposeSubject",
        json!({ "classId": class_id, "subjectId": math_id }),
    );
    let available = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "enrollment.availableSubjects",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        ids_of(&available, "subjects", "subjectId"),
        vec![science_id.clone()]
    );

    // Teachers are scoped to one class's subject link.
    let t1 = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "teachers.create",
        json!({ "lastName": "Owusu", "firstName": "Kofi" }),
    );
    let t1_id = t1["teacherId"].as_str().expect("teacherId").to_string();
    let t2 = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "teachers.create",
        json!({ "lastName": "Boateng", "firstName": "Ama" }),
    );
    let t2_id = t2["teacherId"].as_str().expect("teacherId").to_string();

    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "enrollment.proposeTeacher",
        json!({ "classId": class_id, "subjectId": math_id, "teacherId": t1_id }),
    );
    assert_eq!(pending["status"].as_str(), Some("pending"));

    let available = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "enrollment.availableTeachers",
        json!({ "classId": class_id, "subjectId": math_id }),
    );
    assert_eq!(
        ids_of(&available, "teachers", "teacherId"),
        vec![t2_id.clone()]
    );

    // The exclusion is per subject link, not global.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "enrollment.proposeSubject",
        json!({ "classId": class_id, "subjectId": science_id }),
    );
    let available = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "enrollment.availableTeachers",
        json!({ "classId": class_id, "subjectId": science_id }),
    );
    let mut ids = ids_of(&available, "teachers", "teacherId");
    ids.sort();
    let mut expected = vec![t1_id, t2_id];
    expected.sort();
    assert_eq!(ids, expected);

    let unlinked = request(
        &mut stdin,
        &mut reader,
        "17",
        "enrollment.availableTeachers",
        json!({ "classId": class_id, "subjectId": "no-such-subject" }),
    );
    assert_eq!(unlinked["ok"].as_bool(), Some(false));
    assert_eq!(unlinked["error"]["code"].as_str(), Some("not_found"));
}
