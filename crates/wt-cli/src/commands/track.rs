//! State-changing commands: start, pause, resume and stop.

use std::io::Write;

use anyhow::Result;
use wt_core::{Clock, CommandSink, SessionStore, TimeTrackingEngine};

use super::util::{format_clock, format_local_time};

pub fn start<W, S, C, K>(writer: &mut W, engine: &mut TimeTrackingEngine<S, C, K>) -> Result<()>
where
    W: Write,
    S: SessionStore,
    C: Clock,
    K: CommandSink,
{
    let session_id = engine.start()?;
    let started_at = engine.session().and_then(|session| session.started_at());
    match started_at {
        Some(at) => writeln!(
            writer,
            "Started session {session_id} at {}",
            format_local_time(at)
        )?,
        None => writeln!(writer, "Started session {session_id}")?,
    }
    Ok(())
}

pub fn pause<W, S, C, K>(writer: &mut W, engine: &mut TimeTrackingEngine<S, C, K>) -> Result<()>
where
    W: Write,
    S: SessionStore,
    C: Clock,
    K: CommandSink,
{
    engine.pause()?;
    let paused_at = engine.session().and_then(|session| session.last_ended_at());
    writeln!(
        writer,
        "Paused at {} (elapsed {})",
        paused_at.map_or_else(|| "-".to_string(), format_local_time),
        format_clock(engine.elapsed_time())
    )?;
    Ok(())
}

pub fn resume<W, S, C, K>(writer: &mut W, engine: &mut TimeTrackingEngine<S, C, K>) -> Result<()>
where
    W: Write,
    S: SessionStore,
    C: Clock,
    K: CommandSink,
{
    engine.resume()?;
    let resumed_at = engine
        .session()
        .and_then(|session| session.open_segment())
        .map(|segment| segment.started_at);
    writeln!(
        writer,
        "Resumed at {} (elapsed {})",
        resumed_at.map_or_else(|| "-".to_string(), format_local_time),
        format_clock(engine.elapsed_time())
    )?;
    Ok(())
}

pub fn stop<W, S, C, K>(writer: &mut W, engine: &mut TimeTrackingEngine<S, C, K>) -> Result<()>
where
    W: Write,
    S: SessionStore,
    C: Clock,
    K: CommandSink,
{
    let session = engine.stop()?;
    writeln!(
        writer,
        "Stopped session {}: worked {} across {} segment(s)",
        session.id,
        format_clock(session.closed_duration()),
        session.segments.len()
    )?;
    Ok(())
}
