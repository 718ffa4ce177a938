use std::convert::Infallible;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::backend::{ImageBackend, ProgressSnapshot};
use crate::session::{SectionView, SessionPhase};

/// Polls backend progress for job `epoch` until the future is dropped.
///
/// The first query happens one `interval` after the call. Failed queries are
/// logged and skipped; the previous snapshot stays in place.
pub async fn poll_progress(
    backend: &dyn ImageBackend,
    state: &watch::Sender<SectionView>,
    epoch: u64,
    interval: Duration,
) -> Infallible {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match backend.progress().await {
            Ok(snapshot) => {
                state.send_if_modified(|view| apply_tick(view, epoch, snapshot));
            }
            Err(err) => log::debug!("progress poll for job {epoch} failed: {err}"),
        }
    }
}

/// Applies `snapshot` only while job `epoch` is the section's in-flight job.
/// Returns whether the view changed.
pub fn apply_tick(view: &mut SectionView, epoch: u64, snapshot: ProgressSnapshot) -> bool {
    if view.job_epoch != epoch || view.phase == SessionPhase::Idle {
        return false;
    }
    let changed = view.phase != SessionPhase::Polling || view.progress != Some(snapshot);
    view.phase = SessionPhase::Polling;
    view.progress = Some(snapshot);
    changed
}
