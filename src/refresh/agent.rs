//! Periodic configuration agent.

use super::{cancellation, refresh_config, CancelHandle, Cancellation, RetryPolicy};
use crate::config::ConfigStore;
use crate::metadata::MetadataFetch;
use actix::prelude::*;
use failure::Error;
use futures::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Actor refreshing the agent configuration, once per poll interval.
///
/// The interval is read from the published configuration after every
/// cycle, so metadata changes to it take effect at the next schedule.
/// Cycles never overlap.
pub struct ConfigAgent {
    fetcher: Arc<dyn MetadataFetch>,
    store: ConfigStore,
    policy: RetryPolicy,
    cancel_handle: Option<CancelHandle>,
    cancellation: Cancellation,
    fixed_period: Option<Duration>,
}

impl ConfigAgent {
    pub fn new(fetcher: Arc<dyn MetadataFetch>, store: ConfigStore, policy: RetryPolicy) -> Self {
        let (cancel_handle, cancellation) = cancellation();
        Self {
            fetcher,
            store,
            policy,
            cancel_handle: Some(cancel_handle),
            cancellation,
            fixed_period: None,
        }
    }

    /// Refresh at a fixed period, ignoring the configured poll interval.
    #[cfg(test)]
    fn with_period(mut self, period: Duration) -> Self {
        self.fixed_period = Some(period);
        self
    }

    /// Delay before the next refresh.
    fn next_period(&self) -> Duration {
        self.fixed_period.unwrap_or_else(|| self.store.svc_poll_interval())
    }

    /// Schedule next refresh, after the current poll interval.
    fn schedule_next(&self, ctx: &mut Context<Self>) {
        let period = self.next_period();
        trace!("next configuration refresh in {:?}", period);
        ctx.run_later(period, |_act, ctx| ctx.notify(RefreshTick {}));
    }
}

impl Actor for ConfigAgent {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        trace!("config agent started");

        // Startup configuration is resolved before the agent starts.
        self.schedule_next(ctx);
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        if let Some(handle) = self.cancel_handle.take() {
            handle.cancel();
        }
        Running::Stop
    }
}

impl Supervised for ConfigAgent {}

pub(crate) struct RefreshTick {}

impl Message for RefreshTick {
    type Result = Result<(), Error>;
}

impl Handler<RefreshTick> for ConfigAgent {
    type Result = ResponseActFuture<Self, (), Error>;

    fn handle(&mut self, _msg: RefreshTick, _ctx: &mut Self::Context) -> Self::Result {
        trace!("config agent tick");

        let refresh = refresh_config(
            self.fetcher.clone(),
            self.store.clone(),
            self.policy,
            self.cancellation.clone(),
        )
        .then(|res| {
            if let Err(e) = res {
                error!("failed to refresh agent configuration: {}", e);
            }
            Ok::<(), Error>(())
        });

        let rescheduled =
            actix::fut::wrap_future::<_, Self>(refresh).map(|_r, actor, ctx| {
                actor.schedule_next(ctx);
            });

        Box::new(rescheduled)
    }
}
