use std::time::Duration;

use camstream_frame::packet::{KEEPALIVE, KEEPALIVE_REPLY};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::messages::keepalive_request;
use crate::session::Requester;

/// Send one keepalive and check its result code.
pub(crate) async fn keepalive_once(requester: &Requester, group_id: u32) -> Result<()> {
    let code = requester
        .request(KEEPALIVE, keepalive_request(group_id), KEEPALIVE_REPLY)
        .await?;
    if code != 0 {
        return Err(SessionError::KeepAliveRejected { code });
    }
    trace!(group_id, "keepalive acknowledged");
    Ok(())
}

/// Start the background keepalive for a logged-in session.
///
/// The first keepalive goes out one `period` after login. At most one is in
/// flight: an attempt not answered within `period` fails with
/// `KeepAliveTimeout`, so a silent device never delays the schedule by more
/// than one tick. Failures are logged and published; only `cancel` stops the
/// loop, even mid-request.
pub(crate) fn spawn(
    requester: Requester,
    group_id: u32,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(requester, group_id, period, cancel))
}

async fn run(requester: Requester, group_id: u32, period: Duration, cancel: CancellationToken) {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = timeout(period, keepalive_once(&requester, group_id)) => outcome,
        };
        let err = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(_) => SessionError::KeepAliveTimeout(period),
        };
        warn!(%err, "keepalive failed");
        requester.publish(SessionEvent::KeepAliveFailed(err));
    }
    debug!("keepalive loop stopped");
}
