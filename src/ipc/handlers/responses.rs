use crate::db;
use crate::drafts::{DraftStore, DraftStoreKey, SqliteDraftStore};
use crate::ipc::handlers::config::current;
use crate::ipc::helpers::{param_i64, reply, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Evaluatee, IdRef, Question, SubmittedResponse};
use crate::notify::{self, Notification};
use crate::submit::{SqliteResponseSink, SubmitError, Submitter};
use crate::validate::{validate, ScoreRules};
use rusqlite::Connection;
use serde_json::json;

struct Form {
    questions: Vec<Question>,
    evaluatees: Vec<Evaluatee>,
}

fn load_form(conn: &Connection, key: DraftStoreKey) -> Result<Form, HandlerErr> {
    if db::evaluation_get(conn, key.evaluation_id)
        .map_err(HandlerErr::query)?
        .is_none()
    {
        return Err(HandlerErr::new("not_found", "evaluation not opened")
            .with_details(json!({ "evaluationId": key.evaluation_id })));
    }
    let questions = db::questions_list(conn, key.evaluation_id).map_err(HandlerErr::query)?;
    let evaluatees = db::evaluatees_list(conn, key.evaluation_id, key.class_id)
        .map_err(HandlerErr::query)?;
    if evaluatees.is_empty() {
        return Err(HandlerErr::new("not_found", "no evaluatees registered for this class")
            .with_details(json!({ "classId": key.class_id })));
    }
    Ok(Form {
        questions,
        evaluatees,
    })
}

fn handle_responses_validate(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = DraftStoreKey::new(param_i64(req, "evaluationId")?, param_i64(req, "classId")?);
    let form = load_form(conn, key)?;
    let rules = ScoreRules::from(&current(conn));
    let entries = SqliteDraftStore::new(conn)
        .load(key)
        .map_err(HandlerErr::query)?
        .map(|d| d.entries)
        .unwrap_or_default();

    let violations = validate(&form.questions, &form.evaluatees, &entries, &rules);
    Ok(json!({
        "valid": violations.is_empty(),
        "violations": violations,
        "notifications": notify::to_json(&notify::from_violations(&violations)),
    }))
}

fn handle_responses_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = DraftStoreKey::new(param_i64(req, "evaluationId")?, param_i64(req, "classId")?);
    let evaluator_id = param_i64(req, "evaluatorId")?;
    let form = load_form(conn, key)?;
    let rules = ScoreRules::from(&current(conn));

    let evaluator_name = req
        .params
        .get("evaluatorName")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let submitter = Submitter {
        questions: &form.questions,
        evaluatees: &form.evaluatees,
        rules: &rules,
    };
    let mut store = SqliteDraftStore::new(conn);
    let mut sink = SqliteResponseSink::new(conn, key.class_id).with_evaluator_name(evaluator_name);
    let outcome = match submitter.submit(&mut store, &mut sink, key, evaluator_id) {
        Ok(v) => v,
        Err(SubmitError::Invalid(violations)) => {
            let notes = notify::from_violations(&violations);
            return Err(HandlerErr::new(
                "validation_failed",
                format!("{} answer(s) need attention", violations.len()),
            )
            .with_details(json!({ "violations": violations }))
            .with_notifications(notes));
        }
        Err(e @ SubmitError::AlreadySubmitted { .. }) => {
            return Err(HandlerErr::new("already_submitted", e.to_string()).with_details(json!({
                "evaluationId": key.evaluation_id,
                "evaluatorId": evaluator_id,
            })));
        }
        Err(SubmitError::Storage(e)) => {
            return Err(HandlerErr::new("db_insert_failed", e.to_string()));
        }
    };

    log::info!(
        "evaluator {} submitted {} responses for evaluation {} (class {})",
        evaluator_id,
        outcome.records.len(),
        key.evaluation_id,
        key.class_id
    );
    let notes = vec![Notification::success("Evaluation submitted.")];
    Ok(json!({
        "submitted": outcome.records.len(),
        "draftCleared": outcome.draft_cleared,
        "navigate": "back",
        "notifications": notify::to_json(&notes),
    }))
}

fn handle_responses_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let evaluation_id = param_i64(req, "evaluationId")?;

    let mut stmt = conn
        .prepare(
            "SELECT evaluator_id, evaluatee_id, question_id, score, text_response
             FROM responses
             WHERE evaluation_id = ?
             ORDER BY submitted_at, rowid",
        )
        .map_err(HandlerErr::query)?;
    let responses = stmt
        .query_map([evaluation_id], |r| {
            Ok(SubmittedResponse {
                evaluator: IdRef { id: r.get(0)? },
                evaluatee: IdRef { id: r.get(1)? },
                question: IdRef { id: r.get(2)? },
                evaluation: IdRef { id: evaluation_id },
                score: r.get(3)?,
                text_response: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "responses": responses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.validate" => Some(reply(req, handle_responses_validate(state, req))),
        "responses.submit" => Some(reply(req, handle_responses_submit(state, req))),
        "responses.list" => Some(reply(req, handle_responses_list(state, req))),
        _ => None,
    }
}
