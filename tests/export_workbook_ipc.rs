use sha2::{Digest, Sha256};
use std::io::Read;
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

fn submit_adviser_form(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: i64,
    student: (i64, &str),
    adviser: (i64, &str),
    scores: (f64, f64),
    comment: &str,
) {
    request_ok(
        stdin,
        reader,
        "open",
        "evaluations.open",
        json!({
            "evaluationId": 30,
            "classId": class_id,
            "kind": "STUDENT_TO_ADVISER",
            "title": "Adviser feedback",
            "questions": [
                { "id": 1, "title": "Guidance", "type": "INPUT" },
                { "id": 2, "title": "Availability", "type": "INPUT" },
                { "id": 3, "title": "Comments", "type": "TEXT" }
            ],
            "evaluatees": [{ "id": adviser.0, "displayName": adviser.1 }]
        }),
    );
    let mut entries = serde_json::Map::new();
    entries.insert(format!("{}-1", adviser.0), json!(scores.0));
    entries.insert(format!("{}-2", adviser.0), json!(scores.1));
    entries.insert("text-3".to_string(), json!(comment));
    request_ok(
        stdin,
        reader,
        "draft",
        "drafts.replace",
        json!({ "evaluationId": 30, "classId": class_id, "entries": entries }),
    );
    request_ok(
        stdin,
        reader,
        "submit",
        "responses.submit",
        json!({
            "evaluationId": 30,
            "classId": class_id,
            "evaluatorId": student.0,
            "evaluatorName": student.1
        }),
    );
}

#[test]
fn workbook_has_metadata_and_one_sheet_per_adviser() {
    let workspace = temp_dir("peereval-export");
    let out = workspace.join("out").join("adviser-feedback.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    submit_adviser_form(&mut stdin, &mut reader, 1, (10, "Ana Reyes"), (100, "Dr. Cruz"), (8.0, 6.0), "helpful");
    submit_adviser_form(&mut stdin, &mut reader, 2, (11, "Ben Ong"), (100, "Dr. Cruz"), (9.0, 7.0), "clear, kind");
    submit_adviser_form(&mut stdin, &mut reader, 3, (12, "Cara Lim"), (200, "Dr. Diaz"), (5.0, 4.0), "ok");

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "export.evaluationWorkbook",
        json!({ "evaluationId": 30, "outPath": out.to_string_lossy() }),
    );
    assert_eq!(exported.get("sheetCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(exported.get("responseCount").and_then(|v| v.as_u64()), Some(9));

    let f = std::fs::File::open(&out).expect("open workbook");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(
        manifest.get("format").and_then(|v| v.as_str()),
        Some("peereval-workbook-v1")
    );
    let sheets = manifest
        .get("sheets")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let names: Vec<&str> = sheets
        .iter()
        .filter_map(|s| s.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["Metadata", "Dr. Cruz", "Dr. Diaz"]);

    let mut contents = Vec::new();
    for sheet in &sheets {
        let entry = sheet.get("entry").and_then(|v| v.as_str()).expect("entry");
        let mut csv = String::new();
        archive
            .by_name(entry)
            .expect("sheet entry")
            .read_to_string(&mut csv)
            .expect("read sheet");
        let digest = format!("{:x}", Sha256::digest(csv.as_bytes()));
        assert_eq!(sheet.get("sha256").and_then(|v| v.as_str()), Some(digest.as_str()));
        contents.push(csv);
    }

    assert!(contents[0].contains("Evaluation ID,30\n"));
    assert!(contents[0].contains("Kind,STUDENT_TO_ADVISER\n"));
    assert_eq!(
        contents[1],
        "Question,Ana Reyes,Ben Ong,Average\n\
         Guidance,8,9,8.5\n\
         Availability,6,7,6.5\n\
         Average,7,8,7.5\n\
         \n\
         Comments,helpful,\"clear, kind\"\n"
    );
    assert!(contents[2].starts_with("Question,Cara Lim,Average\n"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_of_unknown_evaluation_is_not_found() {
    let workspace = temp_dir("peereval-export-missing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "export.evaluationWorkbook",
        json!({ "evaluationId": 404, "outPath": workspace.join("x.zip").to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), Some("not_found"));
    let _ = std::fs::remove_dir_all(workspace);
}
