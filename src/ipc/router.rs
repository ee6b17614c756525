use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    log::debug!("request {} {}", req.id, req.method);

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::config::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::evaluations::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::drafts::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::responses::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::export::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::wizard::try_handle(state, &req) {
        return resp;
    }

    log::warn!("unknown method {}", req.method);
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
