mod config;
mod db;
mod drafts;
mod export;
mod ipc;
mod model;
mod notify;
mod submit;
mod validate;
mod wizard;
mod workbook;

use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("PEEREVAL_LOG", "info"))
        .target(env_logger::Target::Stderr)
        .init();

    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    log::info!("peerevald {} ready", env!("CARGO_PKG_VERSION"));
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("dropping malformed request: {e}");
                // Can't reply without id.
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    log::info!("peerevald shutting down");
}
