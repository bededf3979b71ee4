//! Watch command: re-renders the status line on every tick.
//!
//! Each tick recomputes the snapshot from stored timestamps, so a tick that
//! fires late or not at all never changes the reported time.

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use wt_core::{Clock, CommandSink, SessionStore, TimeTrackingEngine};

use super::status::summary_line;
use super::util::format_local_time;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

pub async fn run<W, S, C, K, F>(
    writer: &mut W,
    engine: &TimeTrackingEngine<S, C, K>,
    interval: Duration,
    shutdown: F,
) -> Result<()>
where
    W: Write,
    S: SessionStore,
    C: Clock,
    K: CommandSink,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                let snapshot = engine.snapshot()?;
                writeln!(
                    writer,
                    "{}  {}",
                    format_local_time(snapshot.captured_at),
                    summary_line(&snapshot)
                )?;
                writer.flush()?;
            }
        }
    }
    tracing::debug!("watch stopped");
    Ok(())
}
