// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Runs `task` every `every` for as long as `target` is alive.
///
/// The first run happens one period after spawning. The loop holds only a weak reference
/// between runs, so dropping the last owner stops it at the next tick.
pub(crate) fn spawn_periodic<T, F, Fut>(target: Weak<T>, every: Duration, task: F) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let period = every.max(MIN_PERIOD);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(target) = target.upgrade() else {
                break;
            };
            task(target).await;
        }
    })
}
