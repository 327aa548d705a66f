//
// Lightweight task/timer handles, adapted from holo_utils::task for a
// single-threaded cooperative reactor: every handle below is driven by
// `tokio::task::spawn_local` on the reactor's `LocalSet`, never across
// threads, so there is no `Send` bound to satisfy.
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task;
use tokio::time::Instant;

/// A handle to a task spawned on the reactor's `LocalSet`. Dropping it
/// cancels the task unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

impl<T: 'static> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + 'static,
    {
        Task {
            join_handle: task::spawn_local(future),
            detached: false,
        }
    }

    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

/// A one-shot timer (ConnectRetry backoff, hold timer, ...). Dropping the
/// handle cancels it.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl TimeoutTask {
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()>,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let next = Arc::new(Mutex::new(Instant::now() + timeout));
        let next_child = next.clone();

        let task = Task::spawn(async move {
            let timeout_fut = tokio::time::sleep(timeout);
            tokio::pin!(timeout_fut);

            loop {
                tokio::select! {
                    _ = &mut timeout_fut => {
                        (cb)().await;
                        break;
                    }
                    message = control_rx.recv() => {
                        match message {
                            Some(Message::Reset(new_timeout)) => {
                                let dur = new_timeout.unwrap_or(timeout);
                                let next = Instant::now() + dur;
                                timeout_fut.as_mut().reset(next);
                                *next_child.lock().unwrap() = next;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        TimeoutTask {
            _task: task,
            control: control_tx,
            next,
        }
    }

    /// Resets the timeout, reusing the last duration unless a new one is
    /// given. Used on every received message to refresh the hold timer.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        let _ = self.control.send(Message::Reset(timeout));
    }

    pub fn remaining(&self) -> Duration {
        self.next.lock().unwrap().saturating_duration_since(Instant::now())
    }
}

/// A periodic timer (keepalive ticks). Dropping the handle cancels it.
#[derive(Debug)]
pub struct IntervalTask {
    _task: Task<()>,
    control: UnboundedSender<Message>,
}

impl IntervalTask {
    pub fn new<F, Fut>(interval: Duration, mut cb: F) -> IntervalTask
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = ()>,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let task = Task::spawn(async move {
            let mut interval_fut = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = interval_fut.tick() => {
                        (cb)().await;
                    }
                    message = control_rx.recv() => {
                        match message {
                            Some(Message::Reset(new_interval)) => {
                                interval_fut = tokio::time::interval(
                                    new_interval.unwrap_or(interval),
                                );
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        IntervalTask {
            _task: task,
            control: control_tx,
        }
    }

    pub fn reset(&mut self, interval: Option<Duration>) {
        let _ = self.control.send(Message::Reset(interval));
    }
}
