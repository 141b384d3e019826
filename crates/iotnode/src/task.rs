use core::fmt::Debug;
use core::sync::atomic::{AtomicBool, Ordering};

use alloc::boxed::Box;

use log::{error, info};

/// A cooperative cancellation flag.
///
/// The [`Task`] that owns the flag raises it, while the task body polls it
/// at each of its suspension points and returns once it is raised.
#[derive(Debug, Default)]
pub struct StopFlag(AtomicBool);

impl StopFlag {
    /// Creates a lowered [`StopFlag`].
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Asks the task to terminate.
    #[inline]
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Checks whether the task has been asked to terminate.
    #[must_use]
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The device services which run as tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// The telemetry emission loop.
    Emitter,
    /// The serial report of the channel states.
    Io,
}

impl Service {
    /// Returns the service name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Emitter => "emitter",
            Self::Io => "io",
        }
    }
}

/// The scheduler which runs the device tasks.
///
/// A scheduler owns the execution context of each task. It receives the
/// service to run, its stack budget, and the [`StopFlag`] the task body
/// must poll.
pub trait Scheduler {
    /// The error returned when a task cannot be allocated.
    type Error: Debug;

    /// Starts a task running the given service.
    ///
    /// # Errors
    ///
    /// An error is returned when the scheduler is not able to allocate the
    /// task, i.e. no memory for its stack is available.
    fn spawn(
        &self,
        service: Service,
        stack_size: usize,
        stop: &'static StopFlag,
    ) -> Result<(), Self::Error>;
}

/// A device task.
///
/// A [`Task`] owns the cancellation flag of the task body, while the
/// [`Scheduler`] owns its execution context.
///
/// When a task is joined or dropped, its body is asked to terminate at its
/// next suspension point.
#[derive(Debug)]
pub struct Task {
    service: Service,
    stack_size: usize,
    stop: &'static StopFlag,
    failed: bool,
}

impl Task {
    /// Spawns a [`Task`] running the given service.
    ///
    /// A scheduler failure does not panic: the returned task is marked as
    /// failed and never runs. Check [`Task::failed`] before relying on it.
    ///
    /// Each call leaks a new [`StopFlag`] of a few bytes, which is never
    /// reclaimed. A flag cannot be handed to a new task while a stopped
    /// body may still be polling it, so respawning services in a loop
    /// grows the heap by one flag per spawn.
    pub fn spawn<S: Scheduler>(scheduler: &S, service: Service, stack_size: usize) -> Self {
        // The flag must outlive the task body, which may still be polling it
        // after this handle has been dropped.
        let stop: &'static StopFlag = Box::leak(Box::new(StopFlag::new()));

        let failed = match scheduler.spawn(service, stack_size, stop) {
            Ok(()) => {
                info!(
                    "Task `{}` started with a {stack_size} bytes stack.",
                    service.name()
                );
                false
            }
            Err(e) => {
                error!("Impossible to spawn the task `{}`: {e:?}", service.name());
                true
            }
        };

        Self {
            service,
            stack_size,
            stop,
            failed,
        }
    }

    /// Checks whether the task could not be allocated.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.failed
    }

    /// Checks whether the task is running.
    ///
    /// A task is running when it has been allocated and it has not been
    /// asked to terminate.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.failed && !self.stop.is_requested()
    }

    /// Returns the service run by the task.
    #[must_use]
    pub const fn service(&self) -> Service {
        self.service
    }

    /// Returns the task name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.service.name()
    }

    /// Returns the stack budget in bytes.
    #[must_use]
    pub const fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Asks the task to terminate.
    ///
    /// It does not wait for the task body to return.
    pub fn join(&mut self) {
        if self.is_running() {
            info!("Stopping task `{}`.", self.name());
        }
        self.stop.request();
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.join();
    }
}
