//! Status command for showing the current session and today's total.

use std::io::Write;

use anyhow::Result;
use wt_core::{Clock, CommandSink, EngineSnapshot, SessionStore, TimeTrackingEngine};

use super::util::{format_clock, format_hours};

pub fn run<W, S, C, K>(
    writer: &mut W,
    engine: &TimeTrackingEngine<S, C, K>,
    json: bool,
) -> Result<()>
where
    W: Write,
    S: SessionStore,
    C: Clock,
    K: CommandSink,
{
    let snapshot = engine.snapshot()?;
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&snapshot)?)?;
        return Ok(());
    }

    write_snapshot(writer, &snapshot)?;
    if let Some(skew) = engine.clock_skew() {
        writeln!(
            writer,
            "Warning: stored time is {}s ahead of this clock; elapsed time is clamped.",
            (skew.stored_at - skew.observed_at).num_seconds()
        )?;
    }
    Ok(())
}

fn write_snapshot<W: Write>(writer: &mut W, snapshot: &EngineSnapshot) -> Result<()> {
    let elapsed = chrono::Duration::milliseconds(snapshot.elapsed_ms);
    writeln!(writer, "Owner:   {}", snapshot.owner)?;
    writeln!(writer, "State:   {}", snapshot.state)?;
    match &snapshot.session_id {
        Some(session_id) => writeln!(writer, "Session: {session_id}")?,
        None => writeln!(writer, "Session: -")?,
    }
    writeln!(writer, "Elapsed: {}", format_clock(elapsed))?;
    writeln!(writer, "Today:   {} h", format_hours(snapshot.daily_hours))?;
    Ok(())
}

/// One-line rendering used by `wt watch`.
pub fn summary_line(snapshot: &EngineSnapshot) -> String {
    format!(
        "{:<7} {}  today {} h",
        snapshot.state.as_str(),
        format_clock(chrono::Duration::milliseconds(snapshot.elapsed_ms)),
        format_hours(snapshot.daily_hours)
    )
}
