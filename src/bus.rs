//! Cascading event propagation.
//!
//! The bus turns one seed event into a cascade: every event runs as its own
//! task inside its own [`UnitOfWork`], and the follow-up events a task
//! returns are scheduled as soon as that task finishes, without waiting for
//! its siblings. The run ends when no task is left, or at the first error,
//! which cancels everything still pending.

use std::collections::BTreeMap;

use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::error::SyncError;
use crate::event::{Event, EventKind};
use crate::handlers::Dispatcher;
use crate::mapper::Mapper;
use crate::uow::UnitOfWork;

/// Summary of one settled cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusReport {
    /// Identifier attached to the run's tracing span.
    pub run_id: Uuid,
    /// Number of handler tasks run, the seed included.
    pub tasks: usize,
    /// Number of follow-up events produced.
    pub events: usize,
    /// Number of tasks per event kind.
    pub per_kind: BTreeMap<EventKind, usize>,
}

impl BusReport {
    /// Number of tasks run for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.per_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Drives events through the [`Dispatcher`], one unit of work per event.
#[derive(Debug, Clone)]
pub struct EventBus {
    mapper: Mapper,
    dispatcher: Dispatcher,
    max_events: Option<usize>,
}

impl EventBus {
    /// Create a bus committing through `mapper`.
    pub fn new(mapper: Mapper, dispatcher: Dispatcher) -> Self {
        Self {
            mapper,
            dispatcher,
            max_events: None,
        }
    }

    /// Abort a run once it has started `limit` tasks and wants another.
    pub fn with_max_events(mut self, limit: Option<usize>) -> Self {
        self.max_events = limit;
        self
    }

    /// Mapper every unit of work commits through.
    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    /// Run the cascade started by `seed` on a fresh current-thread runtime.
    ///
    /// Async callers use [`drive`](Self::drive) instead.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Runtime`] if called from within a Tokio runtime
    /// or if the runtime cannot be built, otherwise the same errors as
    /// [`drive`](Self::drive).
    pub fn submit(&self, seed: Event) -> Result<BusReport, SyncError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(SyncError::Runtime(std::io::Error::other(
                "submit called from within an async runtime; use drive",
            )));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SyncError::Runtime)?;
        runtime.block_on(self.drive(seed))
    }

    /// Run the cascade started by `seed` until no events remain.
    ///
    /// Work committed before a failure stays committed; running the same
    /// seed again resumes from there.
    ///
    /// # Errors
    ///
    /// Returns the first error of any task: a handler or commit error,
    /// [`SyncError::TaskPanicked`], an unregistered event kind, or
    /// [`SyncError::CascadeLimit`]. Pending tasks are aborted before the
    /// error is returned.
    pub async fn drive(&self, seed: Event) -> Result<BusReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("bus", %run_id, seed = %seed.kind());
        self.run(run_id, seed).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, seed: Event) -> Result<BusReport, SyncError> {
        let mut report = BusReport {
            run_id,
            ..BusReport::default()
        };
        let mut tasks = JoinSet::new();

        self.schedule(&mut tasks, &mut report, seed)?;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(panicked).and_then(|result| result);
            let follow_ups = match outcome {
                Ok(events) => events,
                Err(e) => return Err(cancel(&mut tasks, e).await),
            };
            report.events += follow_ups.len();
            for event in follow_ups {
                if let Err(e) = self.schedule(&mut tasks, &mut report, event) {
                    return Err(cancel(&mut tasks, e).await);
                }
            }
        }

        info!(tasks = report.tasks, events = report.events, "cascade settled");
        Ok(report)
    }

    fn schedule(
        &self,
        tasks: &mut JoinSet<Result<Vec<Event>, SyncError>>,
        report: &mut BusReport,
        event: Event,
    ) -> Result<(), SyncError> {
        if let Some(limit) = self.max_events
            && report.tasks >= limit
        {
            return Err(SyncError::CascadeLimit { limit });
        }
        let kind = event.kind();
        let handler = self.dispatcher.handler(kind)?;
        report.tasks += 1;
        *report.per_kind.entry(kind).or_default() += 1;

        let mapper = self.mapper.clone();
        let span = info_span!("task", event = %kind);
        tasks.spawn(
            async move {
                UnitOfWork::run(&mapper, |repo| async move {
                    handler.handle(&event, &repo).await
                })
                .await
            }
            .instrument(span),
        );
        Ok(())
    }
}

/// Abort and drain every pending task, then hand back `cause`.
async fn cancel(
    tasks: &mut JoinSet<Result<Vec<Event>, SyncError>>,
    cause: SyncError,
) -> SyncError {
    error!(error = %cause, pending = tasks.len(), "cascade failed, cancelling");
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    cause
}

fn panicked(e: JoinError) -> SyncError {
    if !e.is_panic() {
        return SyncError::TaskPanicked(e.to_string());
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    SyncError::TaskPanicked(message)
}
