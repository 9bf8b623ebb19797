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

fn spawn_sidecar(args: &[&str]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_learnhubd");
    let mut child = Command::new(exe)
        .args(args)
        .env_remove("LEARNHUB_LONG_BREAK_EVERY")
        .env_remove("LEARNHUB_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn learnhubd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {key} in {v}"))
        .to_string()
}

#[test]
fn notes_tasks_and_announcements_follow_their_lesson() {
    let workspace = temp_dir("learnhub-lesson-content");
    let ws = workspace.to_string_lossy().to_string();
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--workspace", &ws]);

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.create",
        json!({ "username": "ms.rivera", "role": "teacher" }),
    );
    let teacher_id = str_field(&teacher, "userId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "users.create",
        json!({ "username": "kid.one" }),
    );
    let student_id = str_field(&student, "userId");
    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({ "ownerId": teacher_id, "title": "Geometry" }),
    );
    let lesson_id = str_field(&lesson, "lessonId");

    let note = request_ok(
        &mut stdin,
        &mut reader,
        "n1",
        "notes.create",
        json!({ "userId": student_id, "lessonId": lesson_id, "title": "Angles", "content": "sum to 180" }),
    );
    let note_id = str_field(&note, "noteId");
    request_ok(
        &mut stdin,
        &mut reader,
        "n2",
        "notes.create",
        json!({ "userId": student_id, "title": "Personal" }),
    );
    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "n3",
        "notes.update",
        json!({ "noteId": note_id, "content": "triangles sum to 180" }),
    );
    assert_eq!(edited["note"]["title"], json!("Angles"));
    assert_eq!(edited["note"]["content"], json!("triangles sum to 180"));
    let blank = request(
        &mut stdin,
        &mut reader,
        "n4",
        "notes.create",
        json!({ "userId": student_id, "title": "  " }),
    );
    assert_eq!(error_code(&blank), "bad_params");

    let task = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "tasks.create",
        json!({
            "userId": student_id,
            "lessonId": lesson_id,
            "title": "Worksheet 3",
            "dueDate": "2026-02-01",
            "priority": "high"
        }),
    );
    let task_id = str_field(&task, "taskId");
    assert_eq!(task["task"]["status"], json!("todo"));
    assert_eq!(task["task"]["priority"], json!("high"));
    let bad_priority = request(
        &mut stdin,
        &mut reader,
        "t2",
        "tasks.create",
        json!({ "userId": student_id, "title": "x", "priority": "urgent" }),
    );
    assert_eq!(error_code(&bad_priority), "bad_params");

    let counts = request_ok(
        &mut stdin,
        &mut reader,
        "t3",
        "tasks.counts",
        json!({ "userId": student_id, "today": "2026-03-01" }),
    );
    assert_eq!(counts["counts"]["todo"], json!(1));
    assert_eq!(counts["counts"]["overdue"], json!(1));

    let done = request_ok(
        &mut stdin,
        &mut reader,
        "t4",
        "tasks.update",
        json!({ "taskId": task_id, "status": "done" }),
    );
    assert_eq!(done["task"]["status"], json!("done"));
    assert!(done["task"]["completedAt"].is_string());

    let post = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "announcements.create",
        json!({
            "lessonId": lesson_id,
            "authorId": teacher_id,
            "title": "Quiz Friday",
            "body": "Chapters 1-3",
            "isPinned": true
        }),
    );
    assert_eq!(post["announcement"]["isPinned"], json!(true));
    let student_post = request(
        &mut stdin,
        &mut reader,
        "a2",
        "announcements.create",
        json!({ "lessonId": lesson_id, "authorId": student_id, "title": "Hi", "body": "hello" }),
    );
    assert_eq!(error_code(&student_post), "bad_params");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "announcements.list",
        json!({ "lessonId": lesson_id }),
    );
    assert_eq!(listed["announcements"].as_array().map(|a| a.len()), Some(1));

    request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "lessons.delete",
        json!({ "lessonId": lesson_id }),
    );
    let notes_after = request_ok(
        &mut stdin,
        &mut reader,
        "n5",
        "notes.list",
        json!({ "userId": student_id }),
    );
    let titles: Vec<&str> = notes_after["notes"]
        .as_array()
        .expect("notes")
        .iter()
        .filter_map(|n| n["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Personal"]);
    let task_after = request(
        &mut stdin,
        &mut reader,
        "t5",
        "tasks.get",
        json!({ "taskId": task_id }),
    );
    assert_eq!(error_code(&task_after), "not_found");
    let gone = request(
        &mut stdin,
        &mut reader,
        "a4",
        "announcements.list",
        json!({ "lessonId": lesson_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
