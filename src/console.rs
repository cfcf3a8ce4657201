//! The interactive diagnostic console.
//!
//! Line-oriented TCP for examining in-memory structures. Commands run
//! synchronously against the engine lock, so each response is a consistent
//! snapshot at the price of briefly stalling telemetry on a busy agent.
//!
//! Each response line is prefixed with a code and an ASCII space:
//!
//! - `200` success, single line
//! - `210` success, first line of multi-line output
//! - `212` continuation line
//! - `400` user error / bad request
//! - `500` not found or internal error
//!
//! Commands: `a2z`, `addr[ess] <address>`, `entry <address>`, `qd`,
//! `cache <|> <n>`, `evict[ions] <n>`, `refr[esh] <n>`, `quit`. The long
//! verbs accept any prefix of four or more characters.

use std::net::IpAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::batch::Batch;
use crate::queue::QueueEnd;
use crate::store::{unix_now, Seconds};
use crate::zone::reverse_name;

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    CrossCheck,
    Address(IpAddr),
    Entry(IpAddr),
    QueueDepths,
    Cache(QueueEnd, usize),
    Evictions(usize),
    Refreshes(usize),
    Quit,
}

/// Verbs that may be abbreviated to any prefix of four or more characters.
const LONG_VERBS: &[&str] = &["address", "evictions", "refresh"];

fn expand_verb(token: &str) -> String {
    let token = token.to_ascii_lowercase();
    if token.len() >= 4 {
        for verb in LONG_VERBS {
            if verb.starts_with(&token) {
                return (*verb).to_string();
            }
        }
    }
    token
}

fn parse_address(token: &str) -> Result<IpAddr, String> {
    token
        .parse()
        .map_err(|_| format!("expected an address, got {token:?}"))
}

fn parse_count(token: &str) -> Result<usize, String> {
    match token.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err("expected a positive integer value".to_string()),
    }
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, args)) = tokens.split_first() else {
        return Ok(None);
    };
    let verb = expand_verb(verb);

    let command = match (verb.as_str(), args) {
        ("a2z", []) => Command::CrossCheck,
        ("address", [addr]) => Command::Address(parse_address(addr)?),
        ("entry", [addr]) => Command::Entry(parse_address(addr)?),
        ("qd", []) => Command::QueueDepths,
        ("cache", [end, n]) => {
            let end = match *end {
                "<" => QueueEnd::Head,
                ">" => QueueEnd::Tail,
                _ => return Err("expected \"<\" or \">\"".to_string()),
            };
            Command::Cache(end, parse_count(n)?)
        }
        ("evictions", [n]) => Command::Evictions(parse_count(n)?),
        ("refresh", [n]) => Command::Refreshes(parse_count(n)?),
        ("quit", []) => Command::Quit,
        ("a2z" | "address" | "entry" | "qd" | "cache" | "evictions" | "refresh" | "quit", _) => {
            return Err("improperly formed request".to_string());
        }
        _ => return Err("unrecognized command".to_string()),
    };
    Ok(Some(command))
}

/// Render a response as protocol lines: `200` for a single line, `210` plus
/// `212` continuations for multi-line output.
fn render(code: u16, lines: &[String]) -> String {
    match lines {
        [] => format!("{code} ok\n"),
        [line] => format!("{code} {line}\n"),
        _ => {
            let mut out = String::new();
            for (i, line) in lines.iter().enumerate() {
                let prefix = if i == 0 { 210 } else { 212 };
                out.push_str(&format!("{prefix} {line}\n"));
            }
            out
        }
    }
}

fn execute(agent: &Agent, command: &Command, now: Seconds) -> (u16, Vec<String>) {
    match command {
        Command::CrossCheck => {
            let check = agent.cross_check();
            if check.discrepancies() == 0 {
                return (200, vec!["in sync".to_string()]);
            }
            let mut lines = Vec::with_capacity(check.discrepancies());
            for address in &check.store_only {
                lines.push(format!("< {address}"));
            }
            for address in &check.zone_only {
                lines.push(format!("> {}", reverse_name(address)));
            }
            (200, lines)
        }

        Command::Address(address) => {
            let Some(details) = agent.address_details(address, now) else {
                return (500, vec!["not found".to_string()]);
            };
            let mut lines = Vec::new();
            if details.best_terminal.is_none() {
                lines.push("! no best resolution".to_string());
            }
            for resolution in &details.resolutions {
                let marker = if resolution.best { "***" } else { "   " };
                let reloaded = if resolution.reloaded { " (reloaded)" } else { "" };
                lines.push(format!(
                    "{marker} {}{reloaded}",
                    resolution.chain.join(" -> ")
                ));
                lines.push(format!(
                    "        fs:{:0.1} ls:{:0.1} qc:{} qt:{:0.1} h:{:0.3}",
                    resolution.first_seen_delta,
                    resolution.last_seen_delta,
                    resolution.query_count,
                    resolution.trend,
                    resolution.score
                ));
            }
            match &details.zone_ptr {
                Some(ptr) => lines.push(format!("-> {ptr}")),
                None => lines.push("-> MISSING FROM ZONE CONTENTS".to_string()),
            }
            (200, lines)
        }

        Command::Entry(address) => match agent.zone_entry(address) {
            Some(entry) => {
                let mut lines = vec![format!("{} {}", reverse_name(address), entry.ptr)];
                if let Some(metadata) = entry.metadata {
                    lines.push(format!(
                        "first:{:0.1} last:{:0.1} update:{:0.1} score:{:0.3}",
                        metadata.first, metadata.last, metadata.update, metadata.score
                    ));
                }
                (200, lines)
            }
            None => (500, vec!["not found".to_string()]),
        },

        Command::QueueDepths => {
            let depths = agent.queue_depths();
            (
                200,
                vec![
                    format!("telemetry backlog: {}", depths.telemetry_backlog),
                    format!("associations: {}", depths.associations),
                    format!("resolutions: {}", depths.resolutions),
                    format!("eviction queue: {}", depths.eviction_queue),
                    format!(
                        "batch: {} pending, writing: {}",
                        depths.batch_pending, depths.batch_writing
                    ),
                ],
            )
        }

        Command::Cache(end, n) => {
            let slice = agent.queue_slice(*end, *n);
            let mut lines = vec![format!(
                "resolutions in cache: {} (limit {})",
                slice.resolution_count, slice.cache_size
            )];
            for (address, count) in &slice.entries {
                lines.push(format!("{address} ({count})"));
            }
            (200, lines)
        }

        Command::Evictions(n) => {
            let events = agent.recent_evictions(*n);
            if events.is_empty() {
                return (200, vec!["no evictions recorded".to_string()]);
            }
            let mut lines = Vec::new();
            for event in &events {
                lines.push(format!("** {:0.3} **", event.timestamp - now));
                lines.push(format!(
                    "resolutions: overage {}  target {}  working {}  after {}",
                    event.overage, event.target_pool, event.working_pool, event.resolutions_after
                ));
                lines.push(format!(
                    "addresses: selected {}  recycled {}  affected {}  deleted {}",
                    event.selected,
                    event.recycled.len(),
                    event.affected.len(),
                    event.deleted.len()
                ));
                for address in &event.deleted {
                    lines.push(format!("    deleted {address}"));
                }
                for address in &event.recycled {
                    lines.push(format!("    recycled {address}"));
                }
                lines.push("removed:".to_string());
                for removed in &event.removed {
                    lines.push(format!(
                        "    {:>8.3}  {}  {}",
                        removed.score, removed.address, removed.terminal
                    ));
                }
            }
            (200, lines)
        }

        Command::Refreshes(n) => {
            let snapshot = agent.recent_refreshes(*n);
            let mut lines = Vec::new();
            if let Some(batch) = &snapshot.current {
                render_batch(&mut lines, batch, now);
            }
            if snapshot.writing {
                lines.push("** a batch is writing **".to_string());
            }
            for batch in &snapshot.recent {
                render_batch(&mut lines, batch, now);
            }
            if lines.is_empty() {
                return (200, vec!["no refresh batches recorded".to_string()]);
            }
            (200, lines)
        }

        Command::Quit => (200, Vec::new()),
    }
}

fn render_batch(lines: &mut Vec<String>, batch: &Batch, now: Seconds) {
    lines.push(format!(
        "** {:0.3} {} **",
        batch.created_at - now,
        batch.state.to_string().to_uppercase()
    ));
    lines.push(format!(
        "add calls: {}  addresses: {}",
        batch.add_calls,
        batch.addresses.len()
    ));
    match (&batch.rcode, &batch.error) {
        (Some(rcode), _) => lines.push(format!(
            "rcode: {rcode}  wire request: {} B  response: {} B",
            batch.wire_request_bytes, batch.wire_response_bytes
        )),
        (None, Some(error)) => lines.push(format!("transport error: {error}")),
        (None, None) => {}
    }
    let accumulating = batch
        .elapsed_accumulating()
        .map(|e| format!("accumulating: {e:0.3}"))
        .unwrap_or_default();
    let processing = batch
        .elapsed_processing()
        .map(|e| format!("  processing: {e:0.3}"))
        .unwrap_or_default();
    if !accumulating.is_empty() || !processing.is_empty() {
        lines.push(format!("elapsed   {accumulating}{processing}"));
    }
}

/// Accept console connections until shutdown.
pub async fn serve(agent: Agent, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("console shutting down");
                return;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "console client connected");
                        let agent = agent.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(agent, stream, shutdown).await {
                                debug!(%peer, error = %e, "console connection closed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "console accept failed"),
                }
            }
        }
    }
}

async fn handle_connection(
    agent: Agent,
    stream: TcpStream,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        writer.write_all(b"# ").await?;

        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { return Ok(()) };

        let response = match parse_command(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Quit)) => return Ok(()),
            Ok(Some(command)) => {
                let (code, lines) = execute(&agent, &command, unix_now());
                render(code, &lines)
            }
            Err(reason) => render(400, &[reason]),
        };
        writer.write_all(response.as_bytes()).await?;
    }
}
