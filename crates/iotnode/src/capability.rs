use core::cell::{Cell, RefCell};
use core::ops::{Deref, DerefMut};

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use embedded_hal::digital::{InputPin, PinState, StatefulOutputPin};

use log::{debug, warn};

use crate::error::{Error, ErrorKind, Result};

// Number of channels a mask can describe.
const MASK_CHANNELS: usize = u32::BITS as usize;

/// The input and output channels the capability interface may access.
///
/// Each mask describes 32 channels as bits `0..31`, so a device can expose
/// at most 32 inputs and 32 outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoMask {
    read_mask: u32,
    write_mask: u32,
}

impl Default for IoMask {
    fn default() -> Self {
        // Eight digital channels for each direction.
        Self::new(0xFF, 0xFF)
    }
}

impl IoMask {
    /// Creates an [`IoMask`] from a read mask and a write mask.
    #[must_use]
    pub const fn new(read_mask: u32, write_mask: u32) -> Self {
        Self {
            read_mask,
            write_mask,
        }
    }

    /// Checks whether the input channel `idx` may be read.
    #[must_use]
    pub const fn input_enabled(&self, idx: usize) -> bool {
        idx < MASK_CHANNELS && self.read_mask & (1 << idx) != 0
    }

    /// Checks whether the output channel `idx` may be read back or changed.
    #[must_use]
    pub const fn output_enabled(&self, idx: usize) -> bool {
        idx < MASK_CHANNELS && self.write_mask & (1 << idx) != 0
    }
}

/// The hardware channels of a device.
///
/// Implementations are shared among tasks and are **not** synchronized by
/// the device state, so each implementation guards its own pins.
pub trait ChannelBank {
    /// Reads the input channel `idx`.
    ///
    /// Returns `None` when the channel does not exist or cannot be read.
    fn read_input(&self, idx: usize) -> Option<bool>;

    /// Reads back the current value of the output channel `idx`.
    ///
    /// Returns `None` when the channel does not exist or cannot be read.
    fn read_output(&self, idx: usize) -> Option<bool>;

    /// Sets the output channel `idx`.
    ///
    /// Returns `false` when the channel does not exist or cannot be written.
    fn write_output(&self, idx: usize, value: bool) -> bool;

    /// Reads the analog input channel `idx` as a raw converter value.
    ///
    /// Banks without analog channels always return `None`.
    fn read_analog(&self, _idx: usize) -> Option<u16> {
        None
    }
}

/// A [`ChannelBank`] built from digital pins.
///
/// Inputs and outputs are indexed by their position.
pub struct PinBank<I, O> {
    inputs: CriticalSectionMutex<RefCell<Vec<I>>>,
    outputs: CriticalSectionMutex<RefCell<Vec<O>>>,
}

impl<I, O> PinBank<I, O>
where
    I: InputPin,
    O: StatefulOutputPin,
{
    /// Creates a [`PinBank`] from its input and output pins.
    #[must_use]
    pub fn new(inputs: Vec<I>, outputs: Vec<O>) -> Self {
        Self {
            inputs: CriticalSectionMutex::new(RefCell::new(inputs)),
            outputs: CriticalSectionMutex::new(RefCell::new(outputs)),
        }
    }

    /// Returns the input and output pins.
    #[must_use]
    pub fn into_pins(self) -> (Vec<I>, Vec<O>) {
        (
            self.inputs.into_inner().into_inner(),
            self.outputs.into_inner().into_inner(),
        )
    }
}

impl<I, O> ChannelBank for PinBank<I, O>
where
    I: InputPin,
    O: StatefulOutputPin,
{
    fn read_input(&self, idx: usize) -> Option<bool> {
        self.inputs.lock(|pins| {
            pins.borrow_mut()
                .get_mut(idx)
                .and_then(|pin| pin.is_high().ok())
        })
    }

    fn read_output(&self, idx: usize) -> Option<bool> {
        self.outputs.lock(|pins| {
            pins.borrow_mut()
                .get_mut(idx)
                .and_then(|pin| pin.is_set_high().ok())
        })
    }

    fn write_output(&self, idx: usize, value: bool) -> bool {
        self.outputs.lock(|pins| {
            pins.borrow_mut()
                .get_mut(idx)
                .is_some_and(|pin| pin.set_state(PinState::from(value)).is_ok())
        })
    }
}

#[derive(Clone, Copy, Default)]
struct Usage {
    count: usize,
    bytes: usize,
}

/// A bounded memory arena.
///
/// Every allocation is accounted for until its [`Allocation`] is returned
/// or dropped.
pub struct MemoryArena {
    budget: usize,
    usage: CriticalSectionMutex<Cell<Usage>>,
}

impl MemoryArena {
    /// Creates a [`MemoryArena`] which hands out at most `budget` bytes.
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self {
            budget,
            usage: CriticalSectionMutex::new(Cell::new(Usage { count: 0, bytes: 0 })),
        }
    }

    /// Allocates `size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::OutOfMemory`] error is returned when the allocation
    /// would exceed the arena budget.
    pub fn allocate(&self, size: usize) -> Result<Allocation<'_>> {
        self.usage.lock(|usage| -> Result<()> {
            let mut current = usage.get();
            let bytes = current
                .bytes
                .checked_add(size)
                .filter(|bytes| *bytes <= self.budget)
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::OutOfMemory,
                        format!(
                            "Unable to allocate {size} bytes, {} of {} bytes are in use.",
                            current.bytes, self.budget
                        ),
                    )
                })?;
            current.bytes = bytes;
            current.count += 1;
            usage.set(current);
            Ok(())
        })?;

        Ok(Allocation {
            arena: self,
            buf: vec![0; size],
        })
    }

    /// Returns an [`Allocation`] to the arena.
    pub fn release(&self, allocation: Allocation<'_>) {
        drop(allocation);
    }

    /// Returns the number of outstanding allocations.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.usage.lock(|usage| usage.get().count)
    }

    /// Returns the number of outstanding bytes.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.usage.lock(|usage| usage.get().bytes)
    }

    /// Returns the arena budget in bytes.
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    fn give_back(&self, size: usize) {
        self.usage.lock(|usage| {
            let mut current = usage.get();
            current.count = current.count.saturating_sub(1);
            current.bytes = current.bytes.saturating_sub(size);
            usage.set(current);
        });
    }
}

/// A zeroed memory region handed out by a [`MemoryArena`].
///
/// The region goes back to its arena when dropped.
pub struct Allocation<'a> {
    arena: &'a MemoryArena,
    buf: Vec<u8>,
}

impl Deref for Allocation<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for Allocation<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        self.arena.give_back(self.buf.len());
    }
}

/// The interface provided to script interpreters and user-defined logic.
///
/// Every channel access is checked against the [`IoMask`] before touching
/// the [`ChannelBank`]: a disabled channel yields a failure result.
///
/// The interface is **not** guarded by the device state mutex. Concurrent
/// readers and writers of the same channel must coordinate themselves.
pub struct AppSystemInterface<B: ChannelBank> {
    mask: IoMask,
    bank: B,
    arena: MemoryArena,
}

impl<B: ChannelBank> AppSystemInterface<B> {
    /// Creates an [`AppSystemInterface`] from a channel bank, its mask, and
    /// the number of bytes scripts may allocate.
    #[must_use]
    pub const fn new(bank: B, mask: IoMask, memory_budget: usize) -> Self {
        Self {
            mask,
            bank,
            arena: MemoryArena::new(memory_budget),
        }
    }

    /// Allocates `size` zeroed bytes for a script.
    ///
    /// # Errors
    ///
    /// An [`ErrorKind::OutOfMemory`] error is returned when the memory
    /// budget is exhausted.
    pub fn allocate_memory(&self, size: usize) -> Result<Allocation<'_>> {
        self.arena.allocate(size).inspect_err(|e| warn!("{e}"))
    }

    /// Returns memory obtained through [`Self::allocate_memory`].
    pub fn return_memory(&self, allocation: Allocation<'_>) {
        self.arena.release(allocation);
    }

    /// Reads the input channel `idx`.
    ///
    /// Returns `false` when the channel is disabled or unreadable.
    pub fn read_input_channel(&self, idx: usize) -> bool {
        if !self.mask.input_enabled(idx) {
            debug!("Input channel {idx} is not enabled.");
            return false;
        }
        self.bank.read_input(idx).unwrap_or(false)
    }

    /// Reads the current value of the output channel `idx`.
    ///
    /// Returns `false` when the channel is disabled or unreadable.
    pub fn read_output_channel(&self, idx: usize) -> bool {
        if !self.mask.output_enabled(idx) {
            debug!("Output channel {idx} is not enabled.");
            return false;
        }
        self.bank.read_output(idx).unwrap_or(false)
    }

    /// Sets the output channel `idx`.
    ///
    /// Returns `false` when the channel is disabled or the write fails.
    pub fn write_output_channel(&self, idx: usize, value: bool) -> bool {
        if !self.mask.output_enabled(idx) {
            debug!("Output channel {idx} is not enabled.");
            return false;
        }
        self.bank.write_output(idx, value)
    }

    /// Reads the analog input channel `idx`.
    ///
    /// Analog inputs share the read mask with digital inputs.
    pub fn read_analog_channel(&self, idx: usize) -> Option<u16> {
        if !self.mask.input_enabled(idx) {
            debug!("Analog channel {idx} is not enabled.");
            return None;
        }
        self.bank.read_analog(idx)
    }

    /// Returns the [`IoMask`].
    #[must_use]
    pub const fn mask(&self) -> IoMask {
        self.mask
    }

    /// Returns the [`MemoryArena`].
    #[must_use]
    pub const fn arena(&self) -> &MemoryArena {
        &self.arena
    }

    /// Returns the [`ChannelBank`].
    #[must_use]
    pub const fn bank(&self) -> &B {
        &self.bank
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use core::cell::RefCell;

    use alloc::vec;

    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    use super::{AppSystemInterface, ChannelBank, ErrorKind, IoMask, MemoryArena, PinBank};

    // An in-memory bank with eight channels per direction.
    #[derive(Default)]
    pub(crate) struct FakeBank {
        pub(crate) inputs: RefCell<[bool; 8]>,
        pub(crate) outputs: RefCell<[bool; 8]>,
        pub(crate) analog: RefCell<[u16; 8]>,
    }

    impl ChannelBank for FakeBank {
        fn read_input(&self, idx: usize) -> Option<bool> {
            self.inputs.borrow().get(idx).copied()
        }

        fn read_output(&self, idx: usize) -> Option<bool> {
            self.outputs.borrow().get(idx).copied()
        }

        fn write_output(&self, idx: usize, value: bool) -> bool {
            self.outputs
                .borrow_mut()
                .get_mut(idx)
                .map(|output| *output = value)
                .is_some()
        }

        fn read_analog(&self, idx: usize) -> Option<u16> {
            self.analog.borrow().get(idx).copied()
        }
    }

    #[test]
    fn default_mask() {
        let mask = IoMask::default();

        assert!(mask.input_enabled(0));
        assert!(mask.input_enabled(7));
        assert!(!mask.input_enabled(8));
        assert!(mask.output_enabled(7));
        assert!(!mask.output_enabled(31));
        // Out of the mask range.
        assert!(!mask.input_enabled(32));
        assert!(!mask.output_enabled(usize::MAX));
    }

    #[test]
    fn masked_channels_fail() {
        let bank = FakeBank::default();
        bank.inputs.borrow_mut()[3] = true;
        bank.outputs.borrow_mut()[2] = true;

        // Only input 3 and output 1 are enabled.
        let app = AppSystemInterface::new(bank, IoMask::new(1 << 3, 1 << 1), 0);

        assert!(app.read_input_channel(3));
        assert!(!app.read_input_channel(4));

        // Output 2 is high, but the channel is masked.
        assert!(!app.read_output_channel(2));
        assert!(!app.write_output_channel(2, false));
        assert!(app.bank().outputs.borrow()[2]);

        assert!(app.write_output_channel(1, true));
        assert!(app.read_output_channel(1));
    }

    #[test]
    fn analog_channels() {
        let bank = FakeBank::default();
        bank.analog.borrow_mut()[0] = 512;

        let app = AppSystemInterface::new(bank, IoMask::new(0b1, 0), 0);

        assert_eq!(app.read_analog_channel(0), Some(512));
        assert_eq!(app.read_analog_channel(1), None);
        assert_eq!(app.mask(), IoMask::new(0b1, 0));
    }

    #[test]
    fn arena_tracks_allocations() {
        let arena = MemoryArena::new(64);

        let mut first = arena.allocate(16).unwrap();
        assert!(first.iter().all(|b| *b == 0));
        first[0] = 42;

        let second = arena.allocate(48).unwrap();
        assert_eq!(arena.outstanding(), 2);
        assert_eq!(arena.outstanding_bytes(), 64);

        // Budget exhausted.
        assert_eq!(
            arena.allocate(1).map(|_| ()).unwrap_err().kind(),
            ErrorKind::OutOfMemory
        );

        arena.release(first);
        assert_eq!(arena.outstanding(), 1);
        assert_eq!(arena.outstanding_bytes(), 48);

        // Dropping returns the memory as well.
        drop(second);
        assert_eq!(arena.outstanding(), 0);
        assert_eq!(arena.outstanding_bytes(), 0);
        assert_eq!(arena.budget(), 64);
    }

    #[test]
    fn failed_allocation_keeps_usage() {
        let arena = MemoryArena::new(8);
        let held = arena.allocate(6).unwrap();

        let error = arena.allocate(3).map(|_| ()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::OutOfMemory);
        assert_eq!(
            error.description(),
            "Unable to allocate 3 bytes, 6 of 8 bytes are in use."
        );
        assert_eq!(arena.outstanding(), 1);
        assert_eq!(arena.outstanding_bytes(), 6);

        // An overflowing request size is refused as well.
        assert!(arena.allocate(usize::MAX).is_err());
        assert_eq!(arena.outstanding_bytes(), 6);

        drop(held);
        assert!(arena.allocate(8).is_ok());
    }

    #[test]
    fn app_memory() {
        let app = AppSystemInterface::new(FakeBank::default(), IoMask::default(), 32);

        let memory = app.allocate_memory(32).unwrap();
        assert_eq!(memory.len(), 32);
        assert!(app.allocate_memory(1).is_err());

        app.return_memory(memory);
        assert_eq!(app.arena().outstanding(), 0);
        assert!(app.allocate_memory(1).is_ok());
    }

    #[test]
    fn pin_bank() {
        let inputs = vec![
            PinMock::new(&[PinTransaction::get(State::High)]),
            PinMock::new(&[PinTransaction::get(State::Low)]),
        ];
        let outputs = vec![PinMock::new(&[
            PinTransaction::set(State::High),
            PinTransaction::get_state(State::High),
        ])];

        let bank = PinBank::new(inputs, outputs);

        assert_eq!(bank.read_input(0), Some(true));
        assert_eq!(bank.read_input(1), Some(false));
        assert_eq!(bank.read_input(2), None);

        assert!(bank.write_output(0, true));
        assert_eq!(bank.read_output(0), Some(true));
        assert!(!bank.write_output(1, true));
        assert_eq!(bank.read_analog(0), None);

        let (inputs, outputs) = bank.into_pins();
        for mut pin in inputs.into_iter().chain(outputs) {
            pin.done();
        }
    }
}
