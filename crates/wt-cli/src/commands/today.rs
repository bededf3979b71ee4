//! Today command: every session touching the current local day.

use std::io::Write;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use wt_core::{
    Clock, CommandSink, SessionId, SessionStatus, SessionStore, TimeSegment, TimeTrackingEngine,
};

use super::util::{format_clock, format_hours, format_local_time};

#[derive(Debug, Serialize)]
struct TodayReport {
    date: NaiveDate,
    timezone: String,
    total_hours: f64,
    sessions: Vec<SessionLine>,
}

#[derive(Debug, Serialize)]
struct SessionLine {
    id: SessionId,
    status: SessionStatus,
    elapsed_ms: i64,
    segments: Vec<TimeSegment>,
}

pub fn run<W, S, C, K>(
    writer: &mut W,
    engine: &TimeTrackingEngine<S, C, K>,
    json: bool,
    timezone: &str,
) -> Result<()>
where
    W: Write,
    S: SessionStore,
    C: Clock,
    K: CommandSink,
{
    let snapshot = engine.snapshot()?;
    let now = snapshot.captured_at;
    let report = TodayReport {
        date: now.with_timezone(&Local).date_naive(),
        timezone: timezone.to_string(),
        total_hours: snapshot.daily_hours,
        sessions: engine
            .sessions_today()?
            .into_iter()
            .map(|session| SessionLine {
                elapsed_ms: session.elapsed_at(now).num_milliseconds(),
                id: session.id,
                status: session.status,
                segments: session.segments,
            })
            .collect(),
    };

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }

    writeln!(writer, "Today {} ({})", report.date, report.timezone)?;
    if report.sessions.is_empty() {
        writeln!(writer, "No sessions tracked.")?;
    }
    for session in &report.sessions {
        writeln!(
            writer,
            "{} {} {}",
            session.id,
            session.status,
            format_clock(chrono::Duration::milliseconds(session.elapsed_ms))
        )?;
        for segment in &session.segments {
            let end = segment
                .ended_at
                .map_or_else(|| "now".to_string(), format_local_time);
            writeln!(writer, "  {} - {end}", format_local_time(segment.started_at))?;
        }
    }
    writeln!(writer, "Total: {} h", format_hours(report.total_hours))?;
    Ok(())
}
