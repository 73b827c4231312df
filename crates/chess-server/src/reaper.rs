//! Background task that finishes sessions nobody has written to in a while,
//! then drops finished sessions once their grace period has passed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::{SessionId, SessionStore, StoreError};

/// How long sessions may sit before each sweep acts on them.
#[derive(Debug, Clone, Copy)]
pub struct ReapPolicy {
    /// Unfinished sessions idle this long are abandoned.
    pub idle: Duration,
    /// Finished sessions stay readable this long, then are dropped.
    pub keep_finished: Duration,
}

#[derive(Debug, Default, PartialEq)]
pub struct Sweep {
    pub abandoned: Vec<SessionId>,
    pub purged: Vec<SessionId>,
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// One sweep. Sessions abandoned here get a full grace period before purging.
pub async fn reap_once(store: &dyn SessionStore, policy: ReapPolicy) -> Result<Sweep, StoreError> {
    let abandoned = store.expire_idle(cutoff(policy.idle)).await?;
    for id in &abandoned {
        info!(game_id = %id, "Reaped idle session");
    }
    let purged = store.purge_finished(cutoff(policy.keep_finished)).await?;
    if !purged.is_empty() {
        info!(count = purged.len(), "Purged finished sessions");
    }
    Ok(Sweep { abandoned, purged })
}

/// Sweep every `every` until the runtime shuts down.
pub fn spawn(store: Arc<dyn SessionStore>, policy: ReapPolicy, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = reap_once(store.as_ref(), policy).await {
                warn!("Idle session sweep failed: {e}");
            }
        }
    })
}
