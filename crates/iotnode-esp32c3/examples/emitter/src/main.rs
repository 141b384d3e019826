#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;

use esp_hal::Config;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;

use log::{error, info};

use embassy_executor::Spawner;
use embassy_time::{Delay, Timer};

use iotnode::capability::IoMask;
use iotnode::config::{DeviceConfig, EmitterConfig};
use iotnode::device::Device;
use iotnode::emitter::{ChannelSampler, Emitter};
use iotnode::endpoint::EndpointSet;

use iotnode_esp32c3::{
    channels::GpioBank,
    http::EdgeClient,
    net::NetworkStack,
    scheduler::EmbassyScheduler,
    wifi::{Wifi, WifiLink},
};

const MAX_HEAP_SIZE: usize = 64 * 1024;
// Time between two checks of the device tasks.
const MONITOR_SECONDS: u64 = 60;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[toml_cfg::toml_config]
struct FirmwareConfig {
    #[default("")]
    ssid: &'static str,
    #[default("")]
    password: &'static str,
    #[default("")]
    collector_host: &'static str,
    #[default(9050)]
    collector_port: u16,
    #[default("esp32c3")]
    device_type: &'static str,
    #[default("generic")]
    device_model: &'static str,
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();

    let config = Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: MAX_HEAP_SIZE);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    info!("ESP RTOS started!");

    let rng = Rng::new();

    // Retrieve firmware configuration.
    let firmware_config = FIRMWARE_CONFIG;

    let wifi = Wifi::configure(
        peripherals.WIFI,
        firmware_config.ssid,
        firmware_config.password,
    )
    .expect("Failed to configure Wi-Fi");
    let uuid = wifi.uuid();
    let (controller, interface) = wifi.into_parts();

    // Sockets:
    // - 1 collector connection
    // - 1 DNS query
    let stack = NetworkStack::build::<2>(rng, interface, spawner)
        .expect("Failed to create network stack.");

    // Digital inputs.
    let inputs = vec![
        Input::new(peripherals.GPIO4, InputConfig::default().with_pull(Pull::Up)),
        Input::new(peripherals.GPIO5, InputConfig::default().with_pull(Pull::Up)),
        Input::new(peripherals.GPIO9, InputConfig::default().with_pull(Pull::Up)),
    ];

    // Digital outputs.
    let outputs = vec![Output::new(
        peripherals.GPIO8,
        Level::High,
        OutputConfig::default(),
    )];

    // Analog input.
    let mut adc_config = AdcConfig::new();
    let analog_pin = adc_config.enable_pin(peripherals.GPIO0, Attenuation::_11dB);
    let adc = Adc::new(peripherals.ADC1, adc_config);

    let bank = GpioBank::new(inputs, outputs).analog(adc, analog_pin);

    let device: &'static Device<GpioBank> = Box::leak(Box::new(
        Device::with_bank(bank, IoMask::new(0b111, 0b1), DeviceConfig::new().io_task(4096)),
    ));

    let endpoints =
        EndpointSet::new().endpoint(firmware_config.collector_host, firmware_config.collector_port);

    let sampler = ChannelSampler::new(device.app_interface())
        .analog(0)
        .digital(0)
        .digital(1)
        .digital(2);

    let emitter = Emitter::new(
        EmitterConfig::new(firmware_config.device_type, firmware_config.device_model)
            .device_id(&uuid),
        endpoints,
        WifiLink::new(controller, stack),
        EdgeClient::new(stack),
        sampler,
        Delay,
    )
    .expect("Failed to create the emitter");

    let scheduler = EmbassyScheduler::new(spawner, emitter, device.app_interface());

    device.init_all().await;
    device
        .spawn_tasks(&scheduler)
        .await
        .expect("Failed to spawn the device tasks");

    info!("Device `{uuid}` started.");

    loop {
        Timer::after_secs(MONITOR_SECONDS).await;

        let running = device.running_tasks().await;
        if running == 0 {
            error!("No device task is running.");
        }
        device.yield_time().await;
    }
}
