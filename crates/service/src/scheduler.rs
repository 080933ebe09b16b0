//! Named background tasks with cancellation.
//!
//! Every timer and I/O loop the engine owns is registered here under a
//! [`TaskName`]. Starting a task under a name cancels whatever held it
//! before, and every start gets a fresh generation so late messages from a
//! cancelled task can be recognized and dropped.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
    StatusPoll,
    UiRefresh,
    StreamReader,
    Poller,
    Reconnect,
    Probe,
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskName::StatusPoll => "status_poll",
            TaskName::UiRefresh => "ui_refresh",
            TaskName::StreamReader => "stream_reader",
            TaskName::Poller => "poller",
            TaskName::Reconnect => "reconnect",
            TaskName::Probe => "probe",
        };
        f.write_str(s)
    }
}

struct Scheduled {
    generation: u64,
    token: CancellationToken,
}

pub struct Scheduler {
    root: CancellationToken,
    tasks: HashMap<TaskName, Scheduled>,
    next_generation: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Start `f` under `name`, cancelling the previous holder.
    ///
    /// The future receives its generation and a token that fires on
    /// [`Scheduler::cancel`], replacement, or [`Scheduler::shutdown`].
    pub fn spawn<F, Fut>(&mut self, name: TaskName, f: F) -> u64
    where
        F: FnOnce(u64, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(name);
        self.next_generation += 1;
        let generation = self.next_generation;
        let token = self.root.child_token();
        tokio::spawn(f(generation, token.clone()));
        self.tasks.insert(name, Scheduled { generation, token });
        generation
    }

    /// Send `make(generation)` once after `delay`
    pub fn after<M, F>(&mut self, name: TaskName, delay: Duration, tx: flume::Sender<M>, make: F) -> u64
    where
        M: Send + 'static,
        F: FnOnce(u64) -> M + Send + 'static,
    {
        self.spawn(name, move |generation, token| async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(make(generation));
                }
            }
        })
    }

    /// Send `make(generation)` every `period`, starting immediately
    pub fn every<M, F>(&mut self, name: TaskName, period: Duration, tx: flume::Sender<M>, make: F) -> u64
    where
        M: Send + 'static,
        F: Fn(u64) -> M + Send + 'static,
    {
        self.spawn(name, move |generation, token| async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(make(generation)).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Cancel the task under `name`. Safe to call when nothing is running.
    pub fn cancel(&mut self, name: TaskName) {
        if let Some(task) = self.tasks.remove(&name) {
            task.token.cancel();
        }
    }

    /// Forget a task that finished on its own, if it is still the current one
    pub fn finish(&mut self, name: TaskName, generation: u64) {
        if self.is_current(name, generation) {
            self.tasks.remove(&name);
        }
    }

    pub fn is_current(&self, name: TaskName, generation: u64) -> bool {
        self.tasks
            .get(&name)
            .is_some_and(|t| t.generation == generation)
    }

    pub fn is_active(&self, name: TaskName) -> bool {
        self.tasks.contains_key(&name)
    }

    pub fn shutdown(&mut self) {
        self.root.cancel();
        self.tasks.clear();
    }
}
