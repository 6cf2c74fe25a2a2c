//! `vireo log` - inspect and verify recorded event logs.

use std::path::Path;

use anyhow::Context;
use serde_json::json;
use vireo_engine::FileStreamProvider;
use vireo_ttd::{parse_log, ActionStatus, LogFormatError, ParsedLog, TtdVar};

use crate::output::StyledOutput;

/// Load a persisted log from a filesystem path.
///
/// The diagnostics flag is baked into the header; a reader normally states
/// which mode it expects up front. The CLI has no such expectation, so it
/// tries plain first and falls back to diagnostics.
fn load(file: &str) -> anyhow::Result<ParsedLog> {
    let path = Path::new(file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid log path: {}", file))?;
    let provider = FileStreamProvider::new(dir);
    match parse_log(&provider, name, false) {
        Err(LogFormatError::DiagMismatch) => Ok(parse_log(&provider, name, true)?),
        other => Ok(other?),
    }
}

fn status_str(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::NotCompleted => "not-completed",
        ActionStatus::Completed => "completed",
        ActionStatus::CompletedWithException => "exception",
    }
}

fn var_str(var: &TtdVar) -> String {
    match var {
        TtdVar::Undefined => "undefined".to_string(),
        TtdVar::Null => "null".to_string(),
        TtdVar::Bool(b) => b.to_string(),
        TtdVar::Int(i) => i.to_string(),
        TtdVar::Double(d) => d.to_string(),
        TtdVar::String(s) => format!("{:?}", s),
        TtdVar::Symbol(id) => format!("symbol#{}", id),
        TtdVar::LogObject(id) => format!("object#{}", id),
    }
}

/// Print every entry in a recorded log, newest last.
pub fn dump(file: &str, as_json: bool, out: &mut StyledOutput) -> anyhow::Result<()> {
    let parsed = load(file)?;

    if as_json {
        let entries: Vec<_> = parsed
            .entries
            .iter()
            .map(|e| {
                json!({
                    "time": e.event_time,
                    "kind": e.payload.kind_name(),
                    "status": status_str(e.status),
                    "result": var_str(&e.result),
                })
            })
            .collect();
        let doc = json!({
            "version": parsed.header.version,
            "arch": parsed.header.arch,
            "platform": parsed.header.platform,
            "diagnostics": parsed.header.diagnostics,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    out.bold(&format!("Log: {}\n", file));
    out.plain(&format!(
        "Format v{}, recorded on {} ({})\n",
        parsed.header.version, parsed.header.platform, parsed.header.arch
    ));
    out.plain(&format!(
        "Payload: {} bytes used, {} reserved, diagnostics {}\n",
        parsed.header.used_payload_bytes,
        parsed.header.reserved_payload_bytes,
        if parsed.header.diagnostics { "on" } else { "off" },
    ));
    out.newline();

    for entry in &parsed.entries {
        out.info(&format!("{:>8}", entry.event_time));
        out.plain(&format!("  {:<24}", entry.payload.kind_name()));
        match entry.status {
            ActionStatus::Completed => {
                if entry.payload.is_result_bearing() {
                    out.plain(&format!("-> {}", var_str(&entry.result)));
                }
            }
            ActionStatus::CompletedWithException => {
                out.warning(&format!("threw {}", var_str(&entry.result)));
            }
            ActionStatus::NotCompleted => {
                if entry.payload.is_result_bearing() {
                    out.error("incomplete");
                }
            }
        }
        out.newline();
    }

    out.newline();
    out.plain(&format!(
        "{} entries, {} property records, {} scripts\n",
        parsed.entries.len(),
        parsed.properties.len(),
        parsed.loaded_scripts.len()
            + parsed.new_function_scripts.len()
            + parsed.eval_scripts.len(),
    ));
    out.flush();
    Ok(())
}

/// Check a recorded log's integrity and summarize its contents.
pub fn verify(file: &str, out: &mut StyledOutput) -> anyhow::Result<()> {
    let parsed = load(file)?;

    let incomplete = parsed
        .entries
        .iter()
        .filter(|e| e.status == ActionStatus::NotCompleted && e.payload.is_result_bearing())
        .count();
    let snapshots = parsed
        .entries
        .iter()
        .filter(|e| e.payload.kind_name() == "snapshot")
        .count();

    out.success("OK");
    out.plain(&format!(
        "  {} (format v{}, {}/{})\n",
        file, parsed.header.version, parsed.header.platform, parsed.header.arch
    ));
    out.plain(&format!(
        "  {} entries, {} snapshots, {} property records\n",
        parsed.entries.len(),
        snapshots,
        parsed.properties.len(),
    ));
    if incomplete > 0 {
        out.warning(&format!(
            "  {} incomplete result-bearing entries; replay stops at the first\n",
            incomplete
        ));
    }
    out.flush();
    Ok(())
}
