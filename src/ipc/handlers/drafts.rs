use crate::db;
use crate::drafts::{DraftError, DraftStore, DraftStoreKey, SqliteDraftStore};
use crate::ipc::helpers::{param_i64, param_opt_i64, param_str, reply, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{DraftEntries, DraftKey, DraftValue, Evaluatee, Question};
use rusqlite::Connection;
use serde_json::json;

fn slot_key(req: &Request) -> Result<DraftStoreKey, HandlerErr> {
    Ok(DraftStoreKey::new(
        param_i64(req, "evaluationId")?,
        param_i64(req, "classId")?,
    ))
}

fn draft_error(e: DraftError) -> HandlerErr {
    let message = e.to_string();
    match e {
        DraftError::Conflict { expected, actual } => HandlerErr::new("draft_conflict", message)
            .with_details(json!({ "expectedRevision": expected, "revision": actual })),
        DraftError::Storage(_) => HandlerErr::new("db_insert_failed", message),
    }
}

/// Keys must name a question of the opened evaluation, with the key form
/// matching the question type. Score keys must also name an evaluatee of the
/// slot.
fn check_key(form: &OpenedForm, key: &DraftKey) -> Result<(), HandlerErr> {
    let (question_id, wants_text) = match key {
        DraftKey::Score { question_id, .. } => (*question_id, false),
        DraftKey::Text { question_id } => (*question_id, true),
    };
    let Some(q) = form.questions.iter().find(|q| q.id == question_id) else {
        return Err(HandlerErr::bad_params("draft key names an unknown question")
            .with_details(json!({ "key": key.to_string() })));
    };
    if q.is_text() != wants_text {
        return Err(HandlerErr::bad_params("draft key does not match question type")
            .with_details(json!({ "key": key.to_string(), "type": q.question_type.as_str() })));
    }
    if let DraftKey::Score { evaluatee_id, .. } = key {
        if !form.evaluatees.iter().any(|e| e.id == *evaluatee_id) {
            return Err(HandlerErr::bad_params("draft key names an unknown evaluatee")
                .with_details(json!({ "key": key.to_string(), "evaluateeId": evaluatee_id })));
        }
    }
    Ok(())
}

struct OpenedForm {
    questions: Vec<Question>,
    evaluatees: Vec<Evaluatee>,
}

fn opened_form(conn: &Connection, key: DraftStoreKey) -> Result<OpenedForm, HandlerErr> {
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
    Ok(OpenedForm {
        questions,
        evaluatees,
    })
}

fn handle_drafts_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = slot_key(req)?;
    let draft = SqliteDraftStore::new(conn).load(key).map_err(HandlerErr::query)?;
    Ok(json!({
        "storeKey": key.to_string(),
        "draft": draft,
    }))
}

fn handle_drafts_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = slot_key(req)?;
    let entry_key: DraftKey = param_str(req, "key")?
        .parse()
        .map_err(HandlerErr::bad_params)?;
    let value: DraftValue = match req.params.get("value") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|_| HandlerErr::bad_params("value must be null, a number or a string"))?,
        None => DraftValue::Empty,
    };
    let expected = param_opt_i64(req, "expectedRevision")?;

    let form = opened_form(conn, key)?;
    check_key(&form, &entry_key)?;

    let mut store = SqliteDraftStore::new(conn);
    let mut entries = store
        .load(key)
        .map_err(HandlerErr::query)?
        .map(|d| d.entries)
        .unwrap_or_default();
    entries.insert(entry_key, value);
    let revision = store.save(key, &entries, expected).map_err(draft_error)?;
    Ok(json!({ "revision": revision, "entryCount": entries.len() }))
}

fn handle_drafts_replace(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = slot_key(req)?;
    let Some(raw) = req.params.get("entries") else {
        return Err(HandlerErr::bad_params("missing entries"));
    };
    let entries: DraftEntries = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid entries: {}", e)))?;
    let expected = param_opt_i64(req, "expectedRevision")?;

    let form = opened_form(conn, key)?;
    for k in entries.keys() {
        check_key(&form, k)?;
    }

    let revision = SqliteDraftStore::new(conn)
        .save(key, &entries, expected)
        .map_err(draft_error)?;
    Ok(json!({ "revision": revision, "entryCount": entries.len() }))
}

fn handle_drafts_clear(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = slot_key(req)?;
    let cleared = SqliteDraftStore::new(conn)
        .clear(key)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "cleared": cleared }))
}

fn handle_drafts_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let keys = SqliteDraftStore::new(conn).keys().map_err(HandlerErr::query)?;
    let slots: Vec<serde_json::Value> = keys
        .iter()
        .map(|k| {
            json!({
                "storeKey": k.to_string(),
                "evaluationId": k.evaluation_id,
                "classId": k.class_id,
            })
        })
        .collect();
    Ok(json!({ "drafts": slots }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "drafts.get" => Some(reply(req, handle_drafts_get(state, req))),
        "drafts.set" => Some(reply(req, handle_drafts_set(state, req))),
        "drafts.replace" => Some(reply(req, handle_drafts_replace(state, req))),
        "drafts.clear" => Some(reply(req, handle_drafts_clear(state, req))),
        "drafts.list" => Some(reply(req, handle_drafts_list(state, req))),
        _ => None,
    }
}
