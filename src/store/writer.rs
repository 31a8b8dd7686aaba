use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::model::Event;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

type Reply<T> = oneshot::Sender<io::Result<T>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Reply<()> },
    Compact { events: Vec<Event>, response: Reply<()> },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL and group-commits appends.
///
/// Waits for a command; for an append, drains every append already queued,
/// writes them as one batch with a single fsync and answers each caller with
/// the shared result. A non-append command found while draining ends the batch
/// and runs once the batch is committed.
pub(super) async fn run_wal_writer(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_maintenance(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_maintenance(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped: all store handles dropped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, Reply<()>)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let (events, responses): (Vec<Event>, Vec<Reply<()>>) = batch.into_iter().unzip();
    // All or nothing: a failed batch leaves no frame behind for replay.
    let result = wal.append_batch(&events);

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("WAL group commit of {} events failed: {e}", events.len());
    }

    for response in responses {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn handle_maintenance(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let before = wal.appends_since_compact();
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            match &result {
                Ok(()) => debug!(
                    "WAL compacted: {before} appends folded into {} events",
                    events.len()
                ),
                Err(e) => error!("WAL compaction failed: {e}"),
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}
