use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

use log::{debug, error, info};

use crate::capability::{AppSystemInterface, ChannelBank, IoMask};
use crate::config::DeviceConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::task::{Scheduler, Service, Task};

// Configuration-time state, only touched under the device mutex.
#[derive(Default)]
struct DeviceTasks {
    initialized: bool,
    emitter: Option<Task>,
    io: Option<Task>,
}

impl DeviceTasks {
    fn running(&self) -> usize {
        [&self.emitter, &self.io]
            .into_iter()
            .flatten()
            .filter(|task| task.is_running())
            .count()
    }
}

/// A device.
///
/// A device owns its tasks and its capability interface.
///
/// Setup and task management happen under a single mutex. The capability
/// interface is instead accessed without acquiring it, so tasks reading
/// and writing channels never wait for a configuration step.
pub struct Device<B: ChannelBank> {
    tasks: Mutex<CriticalSectionRawMutex, DeviceTasks>,
    app: AppSystemInterface<B>,
    config: DeviceConfig,
}

impl<B: ChannelBank> Device<B> {
    /// Creates a [`Device`] from its capability interface and
    /// its configuration.
    #[must_use]
    pub fn new(app: AppSystemInterface<B>, config: DeviceConfig) -> Self {
        Self {
            tasks: Mutex::new(DeviceTasks::default()),
            app,
            config,
        }
    }

    /// Creates a [`Device`] whose capability interface exposes the given
    /// channel bank, restricted to the channels enabled in the mask.
    ///
    /// The interface memory budget comes from the [`DeviceConfig`].
    #[must_use]
    pub fn with_bank(bank: B, mask: IoMask, config: DeviceConfig) -> Self {
        let app = AppSystemInterface::new(bank, mask, config.memory_budget_value());
        Self::new(app, config)
    }

    /// Initializes the device.
    ///
    /// Initializing an already initialized device does nothing.
    pub async fn init_all(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.initialized {
            debug!("Device already initialized.");
            return;
        }

        tasks.initialized = true;
        info!(
            "Device initialized with {:?} and a {} bytes memory budget.",
            self.app.mask(),
            self.app.arena().budget()
        );
    }

    /// Spawns the device tasks.
    ///
    /// The emitter task is always spawned, the io task only when enabled
    /// in the [`DeviceConfig`]. When any task cannot be allocated, all
    /// tasks spawned by this call are stopped.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::NotInitialized`] when [`Self::init_all`] has not been
    ///   called
    /// - [`ErrorKind::AlreadySpawned`] when the tasks are already running
    /// - [`ErrorKind::Spawn`] when the scheduler fails to allocate a task
    pub async fn spawn_tasks<S: Scheduler>(&self, scheduler: &S) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        if !tasks.initialized {
            return Err(Error::new(
                ErrorKind::NotInitialized,
                "Tasks cannot be spawned before the device initialization.",
            ));
        }

        if tasks.running() > 0 {
            return Err(Error::new(
                ErrorKind::AlreadySpawned,
                "The device tasks are already running.",
            ));
        }

        let emitter = spawn(scheduler, Service::Emitter, self.config.emitter_stack_size_value())?;

        // On failure, the emitter task is stopped when dropped.
        let io = self
            .config
            .io_task_value()
            .map(|stack_size| spawn(scheduler, Service::Io, stack_size))
            .transpose()?;

        tasks.emitter = Some(emitter);
        tasks.io = io;

        Ok(())
    }

    /// Stops all device tasks.
    pub async fn stop_tasks(&self) {
        let mut tasks = self.tasks.lock().await;

        for mut task in [tasks.emitter.take(), tasks.io.take()].into_iter().flatten() {
            task.join();
        }
    }

    /// Returns the number of running tasks.
    pub async fn running_tasks(&self) -> usize {
        self.tasks.lock().await.running()
    }

    /// Checks whether the device has been initialized.
    pub async fn is_initialized(&self) -> bool {
        self.tasks.lock().await.initialized
    }

    /// Returns the capability interface.
    ///
    /// The interface is not guarded by the device mutex.
    #[must_use]
    pub const fn app_interface(&self) -> &AppSystemInterface<B> {
        &self.app
    }

    /// Returns the [`DeviceConfig`].
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Yields execution to the other tasks.
    pub async fn yield_time(&self) {
        embassy_futures::yield_now().await;
    }
}

fn spawn<S: Scheduler>(scheduler: &S, service: Service, stack_size: usize) -> Result<Task> {
    let task = Task::spawn(scheduler, service, stack_size);
    if task.failed() {
        error!("Device tasks not started.");
        return Err(Error::new(
            ErrorKind::Spawn,
            alloc::format!("Unable to allocate the `{}` task.", service.name()),
        ));
    }
    Ok(task)
}
