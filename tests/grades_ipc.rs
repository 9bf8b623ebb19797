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
    let exe = env!("CARGO_BIN_EXE_learnhubd");
    let mut child = Command::new(exe)
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {key} in {v}"))
        .to_string()
}

struct Fixture {
    workspace: PathBuf,
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    student_id: String,
    lesson_id: String,
    category_id: String,
    item_ids: Vec<String>,
}

/// Lesson with an A/B/F scale, a single Homework category (weight 100) and
/// two published 50-point items.
fn homework_fixture(prefix: &str) -> Fixture {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.create",
        json!({ "username": "ms.rivera", "role": "teacher" }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "users.create",
        json!({ "username": "sam" }),
    );
    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({ "ownerId": str_field(&teacher, "userId"), "title": "Algebra I" }),
    );
    let lesson_id = str_field(&lesson, "lessonId");
    request_ok(
        &mut stdin,
        &mut reader,
        "cfg",
        "grades.config.create",
        json!({
            "lessonId": lesson_id,
            "gradingScale": {
                "A": { "min": 90, "max": 100, "gpa": 4.0 },
                "B": { "min": 80, "max": 90, "gpa": 3.0 },
                "F": { "min": 0, "max": 80, "gpa": 0.0 }
            },
            "passingGrade": "B"
        }),
    );
    let category = request_ok(
        &mut stdin,
        &mut reader,
        "cat",
        "grades.categories.create",
        json!({ "lessonId": lesson_id, "name": "Homework", "weight": 100 }),
    );
    let category_id = str_field(&category, "categoryId");
    let mut item_ids = Vec::new();
    for (i, name) in ["HW 1", "HW 2"].iter().enumerate() {
        let item = request_ok(
            &mut stdin,
            &mut reader,
            &format!("item{i}"),
            "grades.items.create",
            json!({
                "lessonId": lesson_id,
                "categoryId": category_id,
                "name": name,
                "pointsPossible": 50,
                "isPublished": true
            }),
        );
        item_ids.push(str_field(&item, "gradeItemId"));
    }
    Fixture {
        workspace,
        child,
        stdin,
        reader,
        student_id: str_field(&student, "userId"),
        lesson_id,
        category_id,
        item_ids,
    }
}

impl Fixture {
    fn ok(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        request_ok(&mut self.stdin, &mut self.reader, id, method, params)
    }

    fn call(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        request(&mut self.stdin, &mut self.reader, id, method, params)
    }

    fn submit(&mut self, id: &str, item: usize, score: f64) -> serde_json::Value {
        let params = json!({
            "gradeItemId": self.item_ids[item],
            "userId": self.student_id,
            "score": score
        });
        self.ok(id, "grades.submit", params)
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

#[test]
fn homework_scores_yield_an_a_and_recalculation_is_idempotent() {
    let mut fx = homework_fixture("learnhub-grades-summary");
    fx.submit("s1", 0, 45.0);
    let second = fx.submit("s2", 1, 48.0);
    assert_eq!(second["created"], json!(true));
    assert_eq!(second["summary"]["percentage"], json!(93.0));

    let params = json!({ "lessonId": fx.lesson_id, "userId": fx.student_id });
    let first = fx.ok("calc1", "grades.summary.calculate", params.clone());
    assert_eq!(first["percentage"], json!(93.0));
    assert_eq!(first["letterGrade"], json!("A"));
    assert_eq!(first["gpa"], json!(4.0));
    assert_eq!(first["isPassing"], json!(true));
    assert_eq!(first["earnedPoints"], json!(93.0));
    assert_eq!(first["possiblePoints"], json!(100.0));
    assert_eq!(first["remainingPoints"], json!(0.0));
    let breakdown = first["categoryBreakdown"].as_array().expect("breakdown");
    assert_eq!(breakdown.len(), 1);
    assert_eq!(breakdown[0]["categoryId"], json!(fx.category_id));
    assert_eq!(breakdown[0]["weightedScore"], json!(93.0));

    let again = fx.ok("calc2", "grades.summary.calculate", params.clone());
    assert_eq!(again["percentage"], first["percentage"]);
    assert_eq!(again["letterGrade"], first["letterGrade"]);
    assert_eq!(again["goals"], first["goals"]);

    let cached = fx.ok("get", "grades.summary.get", params);
    assert_eq!(cached["percentage"], json!(93.0));
    assert_eq!(cached["letterGrade"], json!("A"));
    let goals = cached["pointsToNextGrade"].as_array().expect("goals");
    assert_eq!(goals.len(), 3);
    assert_eq!(goals[0]["letter"], json!("A"));
    assert_eq!(goals[0]["alreadyAchieved"], json!(true));

    fx.finish();
}

#[test]
fn resubmitting_updates_the_single_entry() {
    let mut fx = homework_fixture("learnhub-grades-upsert");
    let first = fx.submit("s1", 0, 30.0);
    let second = fx.submit("s2", 0, 40.0);
    assert_eq!(first["entryId"], second["entryId"]);
    assert_eq!(second["created"], json!(false));

    let listed = fx.ok(
        "list",
        "grades.student.list",
        json!({ "lessonId": fx.lesson_id, "userId": fx.student_id }),
    );
    let rows = listed["grades"].as_array().expect("grades");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["score"], json!(40.0));
    assert_eq!(rows[0]["percentage"], json!(80.0));
    assert_eq!(rows[1]["status"], json!("pending"));

    let conn =
        rusqlite::Connection::open(fx.workspace.join("learnhub.sqlite3")).expect("open db");
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM grade_entries WHERE grade_item_id = ? AND user_id = ?",
            (&fx.item_ids[0], &fx.student_id),
            |r| r.get(0),
        )
        .expect("count entries");
    assert_eq!(count, 1);
    drop(conn);
    fx.finish();
}

#[test]
fn late_penalty_reduces_score_and_keeps_raw() {
    let mut fx = homework_fixture("learnhub-grades-late");
    let params = json!({
        "gradeItemId": fx.item_ids[0],
        "userId": fx.student_id,
        "score": 40,
        "isLate": true,
        "latePenalty": 25
    });
    let out = fx.ok("late", "grades.submit", params);
    assert_eq!(out["rawScore"], json!(40.0));
    assert_eq!(out["score"], json!(30.0));
    fx.finish();
}

#[test]
fn what_if_is_read_only_and_reports_difference() {
    let mut fx = homework_fixture("learnhub-grades-whatif");
    fx.submit("s1", 0, 35.0);
    let params = json!({ "lessonId": fx.lesson_id, "userId": fx.student_id });
    fx.ok("calc", "grades.summary.calculate", params.clone());
    let before = fx.ok("get1", "grades.summary.get", params.clone());

    let mut hypo = serde_json::Map::new();
    hypo.insert(fx.item_ids[1].clone(), json!(50));
    hypo.insert("no-such-item".to_string(), json!(10));
    let out = fx.ok(
        "wi",
        "grades.whatIf.calculate",
        json!({
            "lessonId": fx.lesson_id,
            "userId": fx.student_id,
            "hypotheticalScores": hypo
        }),
    );
    assert_eq!(out["current"]["percentage"], json!(70.0));
    assert_eq!(out["current"]["letterGrade"], json!("F"));
    assert_eq!(out["hypothetical"]["percentage"], json!(85.0));
    assert_eq!(out["hypothetical"]["letterGrade"], json!("B"));
    assert_eq!(out["difference"], json!(15.0));
    assert_eq!(out["ignoredItemIds"], json!(["no-such-item"]));

    let after = fx.ok("get2", "grades.summary.get", params);
    assert_eq!(after["calculatedAt"], before["calculatedAt"]);
    assert_eq!(after["percentage"], json!(70.0));

    let listed = fx.ok(
        "list",
        "grades.student.list",
        json!({ "lessonId": fx.lesson_id, "userId": fx.student_id }),
    );
    assert_eq!(listed["grades"][1]["score"], json!(null));

    let mut negative = serde_json::Map::new();
    negative.insert(fx.item_ids[0].clone(), json!(-1));
    let bad = fx.call(
        "neg",
        "grades.whatIf.calculate",
        json!({
            "lessonId": fx.lesson_id,
            "userId": fx.student_id,
            "hypotheticalScores": negative
        }),
    );
    assert_eq!(error_code(&bad), "bad_params");
    fx.finish();
}

#[test]
fn goal_reports_points_needed_on_remaining_work() {
    let mut fx = homework_fixture("learnhub-grades-goal");
    fx.submit("s1", 0, 40.0);
    let goal = fx.ok(
        "goal",
        "grades.goal.calculate",
        json!({ "lessonId": fx.lesson_id, "userId": fx.student_id, "targetGrade": "A" }),
    );
    assert_eq!(goal["letter"], json!("A"));
    assert_eq!(goal["alreadyAchieved"], json!(false));
    assert_eq!(goal["achievable"], json!(true));
    assert_eq!(goal["pointsNeeded"], json!(10.0));
    assert_eq!(goal["percentageNeededOnRemaining"], json!(20.0));

    let missing = fx.call(
        "goal2",
        "grades.goal.calculate",
        json!({ "lessonId": fx.lesson_id, "userId": fx.student_id, "targetGrade": "Z" }),
    );
    assert_eq!(error_code(&missing), "not_found");
    fx.finish();
}

#[test]
fn config_and_category_validation_errors() {
    let mut fx = homework_fixture("learnhub-grades-errors");

    let dup = fx.call(
        "dup",
        "grades.config.create",
        json!({ "lessonId": fx.lesson_id }),
    );
    assert_eq!(error_code(&dup), "conflict");
    assert_eq!(dup["error"]["details"]["status"], json!(409));

    let over = fx.call(
        "over",
        "grades.categories.create",
        json!({ "lessonId": fx.lesson_id, "name": "Exams", "weight": 10 }),
    );
    assert_eq!(error_code(&over), "bad_params");
    assert_eq!(over["error"]["details"]["status"], json!(400));

    let zero_points = fx.call(
        "pts",
        "grades.items.create",
        json!({
            "lessonId": fx.lesson_id,
            "categoryId": fx.category_id,
            "name": "Broken",
            "pointsPossible": 0
        }),
    );
    assert_eq!(error_code(&zero_points), "bad_params");
    fx.finish();
}

#[test]
fn summary_without_config_is_not_found() {
    let workspace = temp_dir("learnhub-grades-noconfig");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let owner = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "users.create",
        json!({ "username": "owner", "role": "teacher" }),
    );
    let owner_id = str_field(&owner, "userId");
    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({ "ownerId": owner_id, "title": "No Config" }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "calc",
        "grades.summary.calculate",
        json!({ "lessonId": str_field(&lesson, "lessonId"), "userId": owner_id }),
    );
    assert_eq!(error_code(&resp), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unpublishing_an_item_refreshes_cached_summary() {
    let mut fx = homework_fixture("learnhub-grades-publish");
    fx.submit("s1", 0, 50.0);
    fx.submit("s2", 1, 25.0);
    let params = json!({ "lessonId": fx.lesson_id, "userId": fx.student_id });
    let cached = fx.ok("get1", "grades.summary.get", params.clone());
    assert_eq!(cached["percentage"], json!(75.0));

    let toggled = fx.ok(
        "pub",
        "grades.items.setPublished",
        json!({ "gradeItemId": fx.item_ids[1], "isPublished": false }),
    );
    assert_eq!(toggled["refreshedSummaries"], json!(1));
    let cached = fx.ok("get2", "grades.summary.get", params);
    assert_eq!(cached["percentage"], json!(100.0));
    assert_eq!(cached["letterGrade"], json!("A"));
    fx.finish();
}
