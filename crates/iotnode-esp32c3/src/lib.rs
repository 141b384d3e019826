//! `iotnode-esp32c3` is a library crate for building `iotnode` firmware
//! using an `ESP32-C3` microcontroller.
//!
//! It provides APIs to:
//!
//! - Configure the `Wi-Fi` controller and associate with an access point
//! - Build the network stack
//! - Send telemetry requests to a collector through an `HTTP` client
//! - Expose the board `GPIO` and `ADC` pins as device channels
//! - Run the device services as `embassy` tasks
//!
//! The board types implement the traits of the `iotnode` crate, so the
//! emission loop and the device state are the same on every board.

#![no_std]
#![deny(missing_docs)]

extern crate alloc;

/// The board channels.
pub mod channels;
/// Error management.
pub mod error;
/// The `HTTP` client.
pub mod http;
/// The network stack builder.
pub mod net;
/// The `embassy` task scheduler.
pub mod scheduler;
/// The `Wi-Fi` controller.
pub mod wifi;

macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write($val);
        x
    }};
}

pub(crate) use mk_static;
