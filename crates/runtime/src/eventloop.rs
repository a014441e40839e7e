//! The event loop bridge.
//!
//! The runtime itself is single-threaded; the event loop is its only contact
//! point with the outside world. It is a queue of jobs (boxed closures run
//! with the context) fed by [`JobSender`] handles, which may live on other
//! threads. Async native completions post their resume jobs here, and
//! [`Context::run`](crate::Context::run) pumps the queue until the root
//! coroutine finishes.

use std::sync::mpsc::{channel, Receiver, Sender};

use crate::context::Context;
use crate::error::RuntimeError;

pub(crate) type Job = Box<dyn FnOnce(&mut Context) -> Result<(), RuntimeError> + Send + 'static>;

/// Cloneable, thread-safe handle used to post jobs onto the loop.
#[derive(Clone)]
pub(crate) struct JobSender(Sender<Job>);

impl JobSender {
    /// Posts a job. When the loop is gone the job is leaked rather than
    /// dropped: the context it captures roots for no longer exists, and
    /// running their destructors from this thread would touch freed state.
    pub(crate) fn post(&self, job: Job) {
        if let Err(undelivered) = self.0.send(job) {
            std::mem::forget(undelivered);
        }
    }
}

pub(crate) struct EventLoop {
    receiver: Receiver<Job>,
    sender: Sender<Job>,
}

impl EventLoop {
    pub(crate) fn new() -> EventLoop {
        let (sender, receiver) = channel();
        EventLoop { receiver, sender }
    }

    pub(crate) fn sender(&self) -> JobSender {
        JobSender(self.sender.clone())
    }

    /// Blocks until a job arrives. The loop keeps a sender of its own, so
    /// this never observes a disconnect; a program waiting on an async
    /// operation that nobody completes blocks here, exactly like one that
    /// waits on a socket nobody writes to.
    pub(crate) fn wait_for_job(&self) -> Job {
        self.receiver.recv().expect("loop owns a sender, the channel cannot disconnect")
    }
}
