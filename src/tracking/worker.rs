use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    time::{interval_at, Duration, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    batcher::FlushReason,
    pipeline::WorkerCommand,
    service::ServiceShared,
    sync_bridge::SyncUpdate,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

fn flush_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Async side of a running service: periodic and threshold flushes, sync
/// pushes and sensor re-selection.
pub(crate) async fn step_worker(
    shared: Arc<ServiceShared>,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    mut flush_interval: watch::Receiver<Duration>,
    cancel_token: CancellationToken,
) {
    let mut period = *flush_interval.borrow_and_update();
    let mut ticker = flush_ticker(period);
    log_info!("step worker started (flush every {:?})", period);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("step worker shutting down");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                let WorkerCommand::Sync(update) = command else {
                    handle_command(&shared, command).await;
                    continue;
                };
                // Each push is a few database round trips; only the newest
                // queued update is worth pushing.
                let (syncs, deferred) = coalesce_syncs(Some(update), &mut commands);
                for update in &syncs {
                    shared.sync.push(update).await;
                }
                for command in deferred {
                    handle_command(&shared, command).await;
                }
            }
            changed = flush_interval.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *flush_interval.borrow_and_update();
                if next != period {
                    log_info!("flush interval {:?} -> {:?}", period, next);
                    period = next;
                    ticker = flush_ticker(period);
                }
            }
            _ = ticker.tick() => {
                flush(&shared, FlushReason::Periodic).await;
            }
        }
    }

    // Deliver the newest queued progress so observers are not left stale.
    // Queued flushes are covered by the final flush on stop.
    let (syncs, _) = coalesce_syncs(None, &mut commands);
    for update in &syncs {
        shared.sync.push(update).await;
    }
}

/// Drain what is queued right now, folding sync updates into the newest one.
/// An achievement is carried forward onto later updates; a second one (a new
/// day) closes the group so both are delivered. Other commands come back in
/// order.
fn coalesce_syncs(
    first: Option<SyncUpdate>,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
) -> (Vec<SyncUpdate>, Vec<WorkerCommand>) {
    let mut syncs = Vec::new();
    let mut deferred = Vec::new();
    let mut current = first;
    let mut folded = 0usize;

    while let Ok(command) = commands.try_recv() {
        let WorkerCommand::Sync(mut next) = command else {
            deferred.push(command);
            continue;
        };
        if let Some(mut previous) = current.take() {
            if next.achievement.is_some() && previous.achievement.is_some() {
                syncs.push(previous);
            } else {
                next.achievement = next.achievement.or_else(|| previous.achievement.take());
                folded += 1;
            }
        }
        current = Some(next);
    }
    syncs.extend(current);

    if folded > 0 {
        log_debug!("coalesced {} queued sync update(s)", folded);
    }
    (syncs, deferred)
}

async fn handle_command(shared: &ServiceShared, command: WorkerCommand) {
    match command {
        WorkerCommand::Flush(reason) => flush(shared, reason).await,
        WorkerCommand::Sync(update) => shared.sync.push(&update).await,
        WorkerCommand::Reselect(tier) => {
            let active = shared.reselect_after_loss(tier);
            log_info!("re-selected sensor after losing {}: {:?}", tier.as_str(), active);
        }
    }
}

async fn flush(shared: &ServiceShared, reason: FlushReason) {
    match shared.batcher.flush(reason).await {
        Ok(outcome) if outcome.records_written > 0 => {
            log_debug!("{:?} flush wrote {} record(s)", reason, outcome.records_written);
        }
        Ok(_) => {}
        Err(err) => {
            log_warn!("{:?} flush failed: {err}", reason);
            shared.record_error(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AchievementEvent, StepSnapshot};
    use chrono::{NaiveDate, Utc};

    fn sync(count: u64, achieved_on: Option<u32>) -> WorkerCommand {
        WorkerCommand::Sync(SyncUpdate {
            snapshot: StepSnapshot {
                count,
                ..StepSnapshot::default()
            },
            achievement: achieved_on.map(|d| AchievementEvent {
                user_id: "u1".into(),
                day: NaiveDate::from_ymd_opt(2024, 5, d).unwrap(),
                steps: count,
                goal: 10,
                at: Utc::now(),
            }),
        })
    }

    fn counts(syncs: &[SyncUpdate]) -> Vec<u64> {
        syncs.iter().map(|update| update.snapshot.count).collect()
    }

    #[test]
    fn queued_syncs_collapse_into_the_newest() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for count in 2..=40 {
            tx.send(sync(count, None)).unwrap();
        }
        tx.send(WorkerCommand::Flush(FlushReason::Threshold)).unwrap();
        tx.send(sync(41, None)).unwrap();

        let WorkerCommand::Sync(first) = sync(1, None) else {
            unreachable!()
        };
        let (syncs, deferred) = coalesce_syncs(Some(first), &mut rx);
        assert_eq!(counts(&syncs), vec![41]);
        assert!(matches!(
            deferred.as_slice(),
            [WorkerCommand::Flush(FlushReason::Threshold)]
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn achievements_are_not_folded_away() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(sync(10, Some(10))).unwrap();
        tx.send(sync(11, None)).unwrap();
        tx.send(sync(3, Some(11))).unwrap();
        tx.send(sync(4, None)).unwrap();

        let (syncs, deferred) = coalesce_syncs(None, &mut rx);
        assert!(deferred.is_empty());
        assert_eq!(counts(&syncs), vec![11, 4]);
        let days: Vec<u32> = syncs
            .iter()
            .map(|update| chrono::Datelike::day(&update.achievement.as_ref().unwrap().day))
            .collect();
        assert_eq!(days, vec![10, 11]);
    }

    #[test]
    fn nothing_queued_keeps_the_first_update() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let WorkerCommand::Sync(first) = sync(7, Some(10)) else {
            unreachable!()
        };
        let (syncs, deferred) = coalesce_syncs(Some(first), &mut rx);
        assert_eq!(counts(&syncs), vec![7]);
        assert!(syncs[0].achievement.is_some());
        assert!(deferred.is_empty());
        assert!(coalesce_syncs(None, &mut rx).0.is_empty());
    }
}
