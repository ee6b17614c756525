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
    let exe = env!("CARGO_BIN_EXE_peerevald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn peerevald");
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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value.pointer("/error/code").and_then(|v| v.as_str())
}

fn open_evaluation(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    questions: serde_json::Value,
) -> serde_json::Value {
    request(
        stdin,
        reader,
        "open",
        "evaluations.open",
        json!({
            "evaluationId": 21,
            "classId": 2,
            "kind": "STUDENT_TO_STUDENT",
            "questions": questions,
            "evaluatees": [
                { "id": 5, "displayName": "Eli Tan" },
                { "id": 6, "displayName": "Fay Go" }
            ]
        }),
    )
}

#[test]
fn draft_survives_sidecar_restart_unchanged() {
    let workspace = temp_dir("peereval-draft-restart");
    let questions = json!([
        { "id": 1, "title": "Effort", "type": "INPUT" },
        { "id": 2, "title": "Notes", "type": "TEXT" }
    ]);

    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let opened = open_evaluation(&mut stdin, &mut reader, questions.clone());
        assert_eq!(opened.get("ok").and_then(|v| v.as_bool()), Some(true));
        // 6-2 is a score key on a TEXT question, so nothing is written.
        let rejected = request(
            &mut stdin,
            &mut reader,
            "2",
            "drafts.replace",
            json!({
                "evaluationId": 21,
                "classId": 2,
                "entries": { "5-1": 7.25, "6-1": "abc", "text-2": "half done", "6-2": null }
            }),
        );
        assert_eq!(error_code(&rejected), Some("bad_params"));
        drop(stdin);
        let _ = child.wait();
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "drafts.get",
        json!({ "evaluationId": 21, "classId": 2 }),
    );
    assert!(got.get("draft").map(|d| d.is_null()).unwrap_or(false));

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "drafts.replace",
        json!({
            "evaluationId": 21,
            "classId": 2,
            "entries": { "5-1": 7.25, "6-1": "abc", "text-2": "half done" }
        }),
    );
    drop(stdin);
    let _ = child.wait();

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let snapshot = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "evaluations.get",
        json!({ "evaluationId": 21, "classId": 2 }),
    );
    assert_eq!(
        snapshot.pointer("/draft/entries").cloned(),
        Some(json!({ "5-1": 7.25, "6-1": "abc", "text-2": "half done" }))
    );
    assert_eq!(
        snapshot.pointer("/draft/revision").and_then(|v| v.as_i64()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn stale_revision_reports_conflict() {
    let workspace = temp_dir("peereval-draft-conflict");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let opened = open_evaluation(
        &mut stdin,
        &mut reader,
        json!([{ "id": 1, "title": "Effort", "type": "INPUT" }]),
    );
    assert_eq!(opened.get("ok").and_then(|v| v.as_bool()), Some(true));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "drafts.set",
        json!({ "evaluationId": 21, "classId": 2, "key": "5-1", "value": 4, "expectedRevision": 0 }),
    );
    assert_eq!(first.get("revision").and_then(|v| v.as_i64()), Some(1));

    // A second tab still believes the slot is empty.
    let stale = request(
        &mut stdin,
        &mut reader,
        "3",
        "drafts.set",
        json!({ "evaluationId": 21, "classId": 2, "key": "6-1", "value": 9, "expectedRevision": 0 }),
    );
    assert_eq!(error_code(&stale), Some("draft_conflict"));
    assert_eq!(
        stale.pointer("/error/details/revision").and_then(|v| v.as_i64()),
        Some(1)
    );

    // Without a revision the write wins.
    let lww = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "drafts.set",
        json!({ "evaluationId": 21, "classId": 2, "key": "6-1", "value": 9 }),
    );
    assert_eq!(lww.get("revision").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(lww.get("entryCount").and_then(|v| v.as_u64()), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reopening_with_new_questions_keeps_stored_set() {
    let workspace = temp_dir("peereval-question-set");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let first = open_evaluation(
        &mut stdin,
        &mut reader,
        json!([{ "id": 1, "title": "Effort", "type": "INPUT" }]),
    );
    assert_eq!(
        first.pointer("/result/questionSetKept").and_then(|v| v.as_bool()),
        Some(false)
    );
    let second = open_evaluation(
        &mut stdin,
        &mut reader,
        json!([{ "id": 7, "title": "Other", "type": "TEXT" }]),
    );
    assert_eq!(
        second.pointer("/result/questionSetKept").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        second.pointer("/result/questions/0/id").and_then(|v| v.as_i64()),
        Some(1)
    );

    let unknown = request(
        &mut stdin,
        &mut reader,
        "2",
        "drafts.set",
        json!({ "evaluationId": 21, "classId": 2, "key": "5-7", "value": 1 }),
    );
    assert_eq!(error_code(&unknown), Some("bad_params"));

    let stranger = request(
        &mut stdin,
        &mut reader,
        "3",
        "drafts.set",
        json!({ "evaluationId": 21, "classId": 2, "key": "999-1", "value": 4 }),
    );
    assert_eq!(error_code(&stranger), Some("bad_params"));
    assert_eq!(
        stranger.pointer("/error/details/evaluateeId").and_then(|v| v.as_i64()),
        Some(999)
    );
    let bulk = request(
        &mut stdin,
        &mut reader,
        "4",
        "drafts.replace",
        json!({ "evaluationId": 21, "classId": 2, "entries": { "5-1": 3, "999-1": 4 } }),
    );
    assert_eq!(error_code(&bulk), Some("bad_params"));
    let draft = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "drafts.get",
        json!({ "evaluationId": 21, "classId": 2 }),
    );
    assert!(draft.get("draft").map(|d| d.is_null()).unwrap_or(false));

    let _ = std::fs::remove_dir_all(workspace);
}
