//! Master/worker task dispatch inside a single job.
//!
//! A [`TaskDispatcher`] owns a fixed pool of worker tasks. Workers loop:
//! announce [`WorkerMessage::Idle`] (carrying the report of the task they
//! just finished, if any), wait for a [`Command`], run it, repeat.
//!
//! The dispatcher only sends a task to a worker whose idle announcement it
//! has just consumed. Since each worker has at most one announcement
//! outstanding, no worker can ever be handed a second task while busy, and
//! no locks are involved: dispatcher and workers share nothing but the
//! channels.
//!
//! Work is submitted one phase at a time. [`TaskDispatcher::run_phase`]
//! dispatches every task of the phase and then waits until every worker is
//! idle again (the phase barrier), so the next phase never overlaps with the
//! previous one.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::orchestration::tasks::{Task, TaskHandler, TaskKind, TaskReport};
use crate::util;
use crate::{Error, Result};

/// Messages from workers to the dispatcher.
#[derive(Debug)]
pub enum WorkerMessage {
    /// The worker is ready for a task.
    Idle {
        /// Sending worker.
        worker: usize,
        /// Report of the task the worker just finished.
        report: Option<TaskReport>,
    },
    /// The worker hit an unrecoverable error and has exited.
    Fatal {
        /// Sending worker.
        worker: usize,
        /// Error description.
        message: String,
    },
}

/// Messages from the dispatcher to one worker.
#[derive(Debug)]
pub enum Command {
    Run(Task),
    Terminate,
}

/// Dispatcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Every worker is idle; ready for a phase.
    Idle,
    /// Handing out the tasks of a phase.
    Dispatching,
    /// All tasks handed out; waiting for every worker to report idle.
    Draining,
    /// Workers are gone, either terminated or aborted.
    Terminated,
}

/// One step of the dispatcher/worker conversation, as seen by the
/// dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// An idle announcement from `worker` was consumed.
    Idle { worker: usize },
    /// A task was sent to `worker`.
    Assigned { worker: usize, kind: TaskKind },
    /// `worker` was told to exit.
    Terminated { worker: usize },
}

/// Coordinates a fixed pool of workers.
///
/// # Example
///
/// ```ignore
/// let mut dispatcher = TaskDispatcher::spawn(4, Arc::new(handler))?;
/// let reports = dispatcher.run_phase("hash", tasks).await?;
/// dispatcher.terminate().await?;
/// ```
pub struct TaskDispatcher {
    /// Shared inbox for all workers.
    inbox: mpsc::Receiver<WorkerMessage>,
    /// One command channel per worker, indexed by worker id.
    outboxes: Vec<mpsc::Sender<Command>>,
    /// Worker tasks, indexed by worker id.
    handles: Vec<JoinHandle<()>>,
    /// Workers whose idle announcement has been consumed, oldest first.
    idle: VecDeque<usize>,
    /// Membership flags for `idle`.
    is_idle: Vec<bool>,
    state: DispatcherState,
    /// Every exchange in order.
    transcript: Vec<Exchange>,
}

impl TaskDispatcher {
    /// Start `workers` worker tasks sharing `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(workers: usize, handler: Arc<dyn TaskHandler>) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Validation(
                "dispatcher needs at least one worker".to_string(),
            ));
        }

        // Each worker has at most one message in flight.
        let (to_master, inbox) = mpsc::channel(workers);
        let mut outboxes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, rx) = mpsc::channel(1);
            outboxes.push(tx);
            handles.push(tokio::spawn(worker_loop(
                id,
                Arc::clone(&handler),
                to_master.clone(),
                rx,
            )));
        }
        debug!(workers, "dispatcher spawned");

        Ok(Self {
            inbox,
            outboxes,
            handles,
            idle: VecDeque::with_capacity(workers),
            is_idle: vec![false; workers],
            state: DispatcherState::Idle,
            transcript: Vec::new(),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.outboxes.len()
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    /// Dispatch `tasks` and wait at the phase barrier.
    ///
    /// Returns the reports of every task in completion order. Any error
    /// (a worker failure, a protocol violation, a lost worker) aborts the
    /// whole pool before it is returned.
    pub async fn run_phase(&mut self, phase: &str, tasks: Vec<Task>) -> Result<Vec<TaskReport>> {
        if self.state != DispatcherState::Idle {
            return Err(Error::Protocol(format!(
                "cannot start phase {} while {:?}",
                phase, self.state
            )));
        }
        info!(phase, tasks = tasks.len(), "phase started");

        let result = self.dispatch_and_drain(tasks).await;
        match &result {
            Ok(reports) => {
                let failed = reports.iter().filter(|r| r.is_failure()).count();
                info!(phase, reports = reports.len(), failed, "phase complete");
            }
            Err(e) => {
                error!(phase, error = %e, "phase failed, aborting workers");
                self.abort();
            }
        }
        result
    }

    async fn dispatch_and_drain(&mut self, tasks: Vec<Task>) -> Result<Vec<TaskReport>> {
        let mut reports = Vec::with_capacity(tasks.len());

        self.state = DispatcherState::Dispatching;
        for task in tasks {
            while self.idle.is_empty() {
                reports.extend(self.receive().await?);
            }
            self.assign(task).await?;
        }

        self.state = DispatcherState::Draining;
        while self.idle.len() < self.worker_count() {
            reports.extend(self.receive().await?);
        }

        self.state = DispatcherState::Idle;
        Ok(reports)
    }

    /// Consume one message from the inbox.
    async fn receive(&mut self) -> Result<Option<TaskReport>> {
        match self.inbox.recv().await {
            Some(WorkerMessage::Idle { worker, report }) => {
                if worker >= self.worker_count() {
                    return Err(Error::Protocol(format!("message from unknown worker {}", worker)));
                }
                if self.is_idle[worker] {
                    return Err(Error::Protocol(format!(
                        "worker {} announced idle twice",
                        worker
                    )));
                }
                self.is_idle[worker] = true;
                self.idle.push_back(worker);
                self.transcript.push(Exchange::Idle { worker });
                Ok(report)
            }
            Some(WorkerMessage::Fatal { worker, message }) => {
                Err(Error::WorkerAborted { worker, message })
            }
            None => Err(Error::Protocol("all workers disconnected".to_string())),
        }
    }

    /// Hand `task` to the longest-idle worker.
    async fn assign(&mut self, task: Task) -> Result<()> {
        let Some(worker) = self.idle.pop_front() else {
            return Err(Error::Protocol("no idle worker to assign to".to_string()));
        };
        self.is_idle[worker] = false;
        let kind = task.kind();
        debug!(worker, %kind, orbit = task.orbit(), "assigning task");
        self.transcript.push(Exchange::Assigned { worker, kind });
        self.outboxes[worker]
            .send(Command::Run(task))
            .await
            .map_err(|_| Error::Protocol(format!("worker {} is gone", worker)))
    }

    /// Tell every worker to exit and wait for them.
    ///
    /// Only valid between phases.
    pub async fn terminate(mut self) -> Result<()> {
        if self.state != DispatcherState::Idle {
            let state = self.state;
            self.abort();
            return Err(Error::Protocol(format!("cannot terminate while {:?}", state)));
        }
        for (worker, outbox) in self.outboxes.iter().enumerate() {
            self.transcript.push(Exchange::Terminated { worker });
            // a worker that already exited has nothing left to stop
            let _ = outbox.send(Command::Terminate).await;
        }
        self.state = DispatcherState::Terminated;

        let handles = std::mem::take(&mut self.handles);
        for result in futures::future::join_all(handles).await {
            result.map_err(|e| Error::TaskJoin(e.to_string()))?;
        }
        debug!("dispatcher terminated");
        Ok(())
    }

    /// Stop every worker immediately.
    pub fn abort(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        self.state = DispatcherState::Terminated;
    }
}

async fn worker_loop(
    id: usize,
    handler: Arc<dyn TaskHandler>,
    to_master: mpsc::Sender<WorkerMessage>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut report = None;
    loop {
        let idle = WorkerMessage::Idle {
            worker: id,
            report: report.take(),
        };
        if to_master.send(idle).await.is_err() {
            return;
        }

        let task = match commands.recv().await {
            Some(Command::Run(task)) => task,
            Some(Command::Terminate) | None => {
                debug!(worker = id, "worker exiting");
                return;
            }
        };

        let handler = Arc::clone(&handler);
        match util::blocking(move || handler.handle(&task)).await {
            Ok(done) => report = Some(done),
            Err(e) => {
                error!(worker = id, error = %e, "worker failed");
                let _ = to_master
                    .send(WorkerMessage::Fatal {
                        worker: id,
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}
