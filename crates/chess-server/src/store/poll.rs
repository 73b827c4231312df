//! Polling fallback for backends that cannot push changes.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::{SessionId, SessionStore, SnapshotStream};

struct PollState {
    store: Arc<dyn SessionStore>,
    id: SessionId,
    ticker: Interval,
    last_revision: Option<u64>,
    done: bool,
}

/// Re-read the session every `every` and yield it whenever its revision
/// moved. The first read is always yielded. The feed ends after the first
/// error, which is yielded to the caller.
pub fn poll_snapshots(store: Arc<dyn SessionStore>, id: SessionId, every: Duration) -> SnapshotStream {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let state = PollState {
        store,
        id,
        ticker,
        last_revision: None,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            st.ticker.tick().await;
            let read = st.store.read(&st.id).await;
            match read {
                Ok(session) if Some(session.revision) == st.last_revision => continue,
                Ok(session) => {
                    st.last_revision = Some(session.revision);
                    return Some((Ok(session), st));
                }
                Err(e) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
            }
        }
    })
    .boxed()
}
