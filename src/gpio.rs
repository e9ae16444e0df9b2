use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    errors::{Error, Result},
    pin::options::Level,
    registers::{layout, MappedRegisters, RegisterBlock, RegisterIo},
    sysfs::{ExportControl, Sysfs},
    watcher::Watcher,
    Config, Pin,
};

/// State shared by a [`Gpio`] and every [`Pin`] taken from it.
#[derive(Debug)]
pub(crate) struct Context {
    pub(crate) registers: RegisterBlock,
    pub(crate) watcher: Watcher,
    /// Last level written per pin, one bit per pin number.
    shadow: AtomicU64,
    /// Pins whose shadow has been read from the hardware.
    seeded: AtomicU64,
}

impl Context {
    fn new(registers: RegisterBlock, watcher: Watcher) -> Self {
        Self {
            registers,
            watcher,
            shadow: AtomicU64::new(0),
            seeded: AtomicU64::new(0),
        }
    }

    pub(crate) fn assert_open(&self) {
        assert!(!self.registers.is_closed(), "gpio used after close");
    }

    /// The first handle to a pin starts its shadow at the hardware level.
    pub(crate) fn seed_shadow(&self, pin: u8) {
        let bit = 1u64 << pin;
        if self.seeded.fetch_or(bit, Ordering::AcqRel) & bit == 0 {
            self.set_shadow(pin, Level::new(self.registers.level(pin)));
        }
    }

    pub(crate) fn shadow(&self, pin: u8) -> Level {
        Level::new(self.shadow.load(Ordering::Acquire) & (1u64 << pin) != 0)
    }

    pub(crate) fn set_shadow(&self, pin: u8, level: Level) {
        let bit = 1u64 << pin;
        if level.is_high() {
            self.shadow.fetch_or(bit, Ordering::AcqRel);
        } else {
            self.shadow.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    /// Flips the shadow of `pin` and returns the new level.
    pub(crate) fn toggle_shadow(&self, pin: u8) -> Level {
        let bit = 1u64 << pin;
        !Level::new(self.shadow.fetch_xor(bit, Ordering::AcqRel) & bit != 0)
    }
}

/// An open GPIO peripheral: the mapped register page plus the default
/// interrupt [`Watcher`].
///
/// Only one `Gpio` backed by the memory device may be open in a process at a
/// time. Closing it, explicitly or by dropping it, unmaps nothing that a
/// live [`Pin`] could still touch: pins panic on use after close and the
/// page is unmapped once the last of them is gone.
#[derive(Debug)]
pub struct Gpio {
    ctx: Arc<Context>,
}

impl Gpio {
    /// Map `/dev/gpiomem` and use `/sys/class/gpio` for interrupts.
    pub fn open() -> Result<Self> {
        Self::open_with(Config::new())
    }

    pub fn open_with(config: Config) -> Result<Self> {
        let registers = MappedRegisters::open(&config.device, config.offset)?;
        let control = Arc::new(Sysfs::new(&config.sysfs_root));
        Self::with_backend(Box::new(registers), control, &config)
    }

    /// Build a `Gpio` over any register and export backend, such as the
    /// simulated ones in [`mock`](crate::mock).
    pub fn with_backend(
        registers: Box<dyn RegisterIo>,
        control: Arc<dyn ExportControl>,
        config: &Config,
    ) -> Result<Self> {
        let registers = RegisterBlock::new(registers, config.pull, config.pull_settle);
        let watcher = Watcher::new(control, config)?;
        Ok(Self {
            ctx: Arc::new(Context::new(registers, watcher)),
        })
    }

    /// A handle to BCM GPIO `number`.
    pub fn pin(&self, number: u8) -> Result<Pin> {
        self.ctx.assert_open();
        if number >= layout::GPIO_PIN_MAX {
            return Err(Error::InvalidPin(number));
        }
        Ok(Pin::new(self.ctx.clone(), number))
    }

    pub fn watcher(&self) -> &Watcher {
        &self.ctx.watcher
    }

    pub fn registers(&self) -> &RegisterBlock {
        &self.ctx.registers
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.registers.is_closed()
    }

    /// Stop the default watcher, releasing all its pins, and invalidate the
    /// register block. Calling it again does nothing.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.ctx.watcher.close();
        self.ctx.registers.close();
        log::debug!("gpio closed");
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        self.close();
    }
}
