use core::cell::RefCell;

use alloc::boxed::Box;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embassy_time::{Delay, Timer};

use log::{debug, error, info};

use iotnode::capability::AppSystemInterface;
use iotnode::emitter::{ChannelSampler, Emitter};
use iotnode::task::{Scheduler, Service, StopFlag};

use crate::channels::GpioBank;
use crate::error::{Error, Result};
use crate::http::EdgeClient;
use crate::wifi::WifiLink;

// Time between two channel reports of the io task.
const IO_REPORT_MS: u64 = 5000;
// Number of digital channels reported by the io task.
const IO_REPORT_CHANNELS: usize = 8;

/// The board emitter.
pub type BoardEmitter =
    Emitter<WifiLink, EdgeClient, ChannelSampler<'static, GpioBank>, Delay>;

// The emitter is moved into its task and given back once the task stops.
type EmitterSlot = CriticalSectionMutex<RefCell<Option<BoardEmitter>>>;

#[embassy_executor::task]
async fn emitter_task(slot: &'static EmitterSlot, stop: &'static StopFlag) {
    let Some(mut emitter) = slot.lock(|slot| slot.borrow_mut().take()) else {
        error!("The emitter is owned by another task.");
        return;
    };

    emitter.run(stop).await;

    slot.lock(|slot| *slot.borrow_mut() = Some(emitter));
}

#[embassy_executor::task]
async fn io_task(app: &'static AppSystemInterface<GpioBank>, stop: &'static StopFlag) {
    while !stop.is_requested() {
        let inputs = (0..IO_REPORT_CHANNELS).fold(0u8, |bits, idx| {
            bits | (u8::from(app.read_input_channel(idx)) << idx)
        });
        let outputs = (0..IO_REPORT_CHANNELS).fold(0u8, |bits, idx| {
            bits | (u8::from(app.read_output_channel(idx)) << idx)
        });
        info!("Inputs: {inputs:08b} Outputs: {outputs:08b}");

        Timer::after_millis(IO_REPORT_MS).await;
    }
    debug!("Io task stopped.");
}

/// A [`Scheduler`] running the device services as `embassy` tasks.
///
/// Each service has a single task slot: a service cannot be spawned again
/// until its previous task has returned.
///
/// Task futures are statically allocated by the executor, so the requested
/// stack sizes are only informative.
pub struct EmbassyScheduler {
    spawner: Spawner,
    emitter: &'static EmitterSlot,
    app: &'static AppSystemInterface<GpioBank>,
}

impl EmbassyScheduler {
    /// Creates an [`EmbassyScheduler`] which owns the emitter.
    #[must_use]
    pub fn new(
        spawner: Spawner,
        emitter: BoardEmitter,
        app: &'static AppSystemInterface<GpioBank>,
    ) -> Self {
        let emitter = Box::leak(Box::new(CriticalSectionMutex::new(RefCell::new(Some(
            emitter,
        )))));

        Self {
            spawner,
            emitter,
            app,
        }
    }
}

impl Scheduler for EmbassyScheduler {
    type Error = Error;

    fn spawn(&self, service: Service, stack_size: usize, stop: &'static StopFlag) -> Result<()> {
        debug!(
            "Spawning `{}`, requested stack of {stack_size} bytes.",
            service.name()
        );

        match service {
            Service::Emitter => self.spawner.spawn(emitter_task(self.emitter, stop))?,
            Service::Io => self.spawner.spawn(io_task(self.app, stop))?,
        }

        Ok(())
    }
}
