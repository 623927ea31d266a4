use drc_rules::server::{dispatch, error_codes, poll_background, Request, Response, ServerState};
use log::{error, info};
use std::io::{self, BufRead, Write};

fn write_line<W: Write>(out: &mut W, value: &impl serde::Serialize) -> io::Result<()> {
    let line = serde_json::to_string(value).map_err(io::Error::other)?;
    writeln!(out, "{}", line)?;
    out.flush()
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("[Server] Starting rule server...");
    let mut state = ServerState::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        // Report finished background work before handling the next request
        if let Some(notification) = poll_background(&mut state) {
            write_line(&mut stdout, &notification)?;
        }

        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("[Server] Error reading stdin: {}", e);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&mut state, request),
            Err(e) => {
                error!("[Server] Failed to parse request: {}", e);
                Response::error(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e))
            }
        };
        write_line(&mut stdout, &response)?;
    }

    info!("[Server] stdin closed, shutting down");
    Ok(())
}
