//! `iotnode` is a library crate that provides the architecture-agnostic core
//! of the firmware running on a networked sensor and actuator node.
//!
//! A node samples its local inputs and periodically reports them to a remote
//! collector over a wireless network. At the same time, it exposes a small
//! capability interface that higher-level logic can use to read and write
//! the node channels.
//!
//! This crate provides APIs to:
//!
//! - Build the `URI` of a telemetry request, together with its ordered and
//!   unique query parameters, into a bounded buffer
//! - Keep a set of candidate collector endpoints and select one of them
//!   deterministically
//! - Run the emission loop, which associates with the network, sends a
//!   request every cycle and backs off when the association fails
//! - Spawn the device services as tasks which can be cooperatively stopped
//! - Share the device state and its capability interface among tasks
//!
//! All hardware and network accesses go through small traits, such as
//! [`emitter::Link`], [`emitter::HttpClient`], [`task::Scheduler`] and
//! [`capability::ChannelBank`], so the same logic runs on any board that
//! implements them. Sleeps rely on the [`embedded-hal-async`] delay trait.
//!
//! [`embedded-hal-async`]: https://crates.io/crates/embedded-hal-async

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// The capability interface exposed to scripts and user-defined logic.
pub mod capability;
/// Emitter and device configurations.
pub mod config;
/// The mutex-guarded device state.
pub mod device;
/// The set of candidate collector endpoints.
pub mod endpoint;
/// The telemetry emission loop.
pub mod emitter;
/// Error management.
pub mod error;
/// Device identity derived from the hardware address.
pub mod identity;
/// Device tasks and their cooperative cancellation.
pub mod task;
/// The request builder.
pub mod uri;
