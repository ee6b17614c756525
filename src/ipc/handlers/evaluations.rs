use crate::db;
use crate::drafts::{DraftStore, DraftStoreKey, SqliteDraftStore};
use crate::ipc::helpers::{param_i64, reply, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{EvaluationKind, Evaluatee, Question};
use crate::notify::{self, Notification, Severity};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

/// Everything a form needs to render: the stored question set, the evaluatee
/// set of this slot and whatever draft survived from earlier sessions.
pub fn form_snapshot(
    conn: &Connection,
    evaluation_id: i64,
    class_id: i64,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(evaluation) = db::evaluation_get(conn, evaluation_id).map_err(HandlerErr::query)? else {
        return Err(HandlerErr::new("not_found", "evaluation not opened")
            .with_details(json!({ "evaluationId": evaluation_id })));
    };
    let questions = db::questions_list(conn, evaluation_id).map_err(HandlerErr::query)?;
    let evaluatees = db::evaluatees_list(conn, evaluation_id, class_id).map_err(HandlerErr::query)?;
    let draft = SqliteDraftStore::new(conn)
        .load(DraftStoreKey::new(evaluation_id, class_id))
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "evaluation": {
            "id": evaluation.id,
            "kind": evaluation.kind.as_str(),
            "title": evaluation.title,
            "openedAt": evaluation.opened_at,
        },
        "classId": class_id,
        "questions": questions,
        "evaluatees": evaluatees,
        "draft": draft,
    }))
}

fn parse_questions(req: &Request) -> Result<Vec<Question>, HandlerErr> {
    let Some(raw) = req.params.get("questions") else {
        return Err(HandlerErr::bad_params("missing questions"));
    };
    let questions: Vec<Question> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid questions: {}", e)))?;
    if questions.is_empty() {
        return Err(HandlerErr::bad_params("question set is empty"));
    }
    let mut seen = HashSet::new();
    for q in &questions {
        if q.id < 0 || !seen.insert(q.id) {
            return Err(HandlerErr::bad_params("question ids must be unique and non-negative")
                .with_details(json!({ "questionId": q.id })));
        }
    }
    Ok(questions)
}

fn parse_evaluatees(req: &Request, kind: EvaluationKind) -> Result<Vec<Evaluatee>, HandlerErr> {
    let Some(raw) = req.params.get("evaluatees") else {
        return Err(HandlerErr::bad_params("missing evaluatees"));
    };
    let evaluatees: Vec<Evaluatee> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid evaluatees: {}", e)))?;
    if let Some(e) = evaluatees.iter().find(|e| e.id < 0) {
        return Err(HandlerErr::bad_params("evaluatee ids must be non-negative")
            .with_details(json!({ "evaluateeId": e.id })));
    }
    kind.check_evaluatees(&evaluatees)
        .map_err(|m| HandlerErr::bad_params(m).with_details(json!({ "kind": kind.as_str() })))?;
    Ok(evaluatees)
}

fn handle_evaluations_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let evaluation_id = param_i64(req, "evaluationId")?;
    let class_id = param_i64(req, "classId")?;
    let kind_raw = req
        .params
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing kind"))?;
    let kind = EvaluationKind::parse(kind_raw)
        .ok_or_else(|| HandlerErr::bad_params("kind must be one of: STUDENT_TO_STUDENT, STUDENT_TO_ADVISER, ADVISER_TO_STUDENT"))?;
    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("Evaluation {}", evaluation_id));
    let questions = parse_questions(req)?;
    let evaluatees = parse_evaluatees(req, kind)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::query)?;
    let existing = db::evaluation_get(&tx, evaluation_id).map_err(HandlerErr::query)?;
    let mut question_set_kept = false;
    match existing {
        Some(ev) => {
            if ev.kind != kind {
                return Err(HandlerErr::bad_params("evaluation already opened with another kind")
                    .with_details(json!({ "storedKind": ev.kind.as_str(), "kind": kind.as_str() })));
            }
            let stored = db::questions_list(&tx, evaluation_id).map_err(HandlerErr::query)?;
            if stored != questions {
                log::warn!(
                    "evaluation {} re-opened with a different question set; keeping the stored one",
                    evaluation_id
                );
                question_set_kept = true;
            }
        }
        None => {
            db::evaluation_insert(&tx, evaluation_id, kind, &title)
                .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
            db::questions_insert(&tx, evaluation_id, &questions)
                .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
            log::info!(
                "evaluation {} registered ({}, {} questions)",
                evaluation_id,
                kind.as_str(),
                questions.len()
            );
        }
    }
    db::evaluatees_replace(&tx, evaluation_id, class_id, &evaluatees)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    tx.commit().map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    let mut snapshot = form_snapshot(conn, evaluation_id, class_id)?;
    snapshot["questionSetKept"] = json!(question_set_kept);
    if question_set_kept {
        let notes = vec![Notification::new(
            Severity::Info,
            "The questions for this evaluation changed; answers stay tied to the original set.",
        )];
        snapshot["notifications"] = notify::to_json(&notes);
    }
    Ok(snapshot)
}

fn handle_evaluations_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let evaluation_id = param_i64(req, "evaluationId")?;
    let class_id = param_i64(req, "classId")?;
    form_snapshot(conn, evaluation_id, class_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.open" => Some(reply(req, handle_evaluations_open(state, req))),
        "evaluations.get" => Some(reply(req, handle_evaluations_get(state, req))),
        _ => None,
    }
}
