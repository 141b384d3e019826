use core::cell::RefCell;

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::gpio::{Input, Output};
use esp_hal::peripherals::{ADC1, GPIO0};

use iotnode::capability::{ChannelBank, PinBank};

/// The converter reading the analog channel.
pub type AnalogConverter = Adc<'static, ADC1<'static>, Blocking>;
/// The analog channel pin.
pub type AnalogPin = AdcPin<GPIO0<'static>, ADC1<'static>>;

struct Analog {
    adc: AnalogConverter,
    pin: AnalogPin,
}

/// The board channels.
///
/// Digital inputs and outputs are indexed by their position, while the
/// only analog input is channel `0`.
pub struct GpioBank {
    pins: PinBank<Input<'static>, Output<'static>>,
    analog: CriticalSectionMutex<RefCell<Option<Analog>>>,
}

impl GpioBank {
    /// Creates a [`GpioBank`] from its digital pins.
    #[must_use]
    pub fn new(inputs: Vec<Input<'static>>, outputs: Vec<Output<'static>>) -> Self {
        Self {
            pins: PinBank::new(inputs, outputs),
            analog: CriticalSectionMutex::new(RefCell::new(None)),
        }
    }

    /// Adds an analog channel read through the given converter.
    #[must_use]
    pub fn analog(self, adc: AnalogConverter, pin: AnalogPin) -> Self {
        self.analog
            .lock(|analog| *analog.borrow_mut() = Some(Analog { adc, pin }));
        self
    }
}

impl ChannelBank for GpioBank {
    fn read_input(&self, idx: usize) -> Option<bool> {
        self.pins.read_input(idx)
    }

    fn read_output(&self, idx: usize) -> Option<bool> {
        self.pins.read_output(idx)
    }

    fn write_output(&self, idx: usize, value: bool) -> bool {
        self.pins.write_output(idx, value)
    }

    fn read_analog(&self, idx: usize) -> Option<u16> {
        if idx != 0 {
            return None;
        }

        self.analog.lock(|analog| {
            analog
                .borrow_mut()
                .as_mut()
                .and_then(|Analog { adc, pin }| nb::block!(adc.read_oneshot(pin)).ok())
        })
    }
}
