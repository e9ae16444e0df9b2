use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use crate::pin::options::{Mode, Pull};

pub mod layout;
mod mapped;

pub use mapped::MappedRegisters;

/// Raw access to the 32-bit words of the GPIO register page.
///
/// Single-register accesses must be atomic with respect to each other, as
/// they are on the hardware. Anything spanning several accesses is
/// serialized by [`RegisterBlock::with_lock`].
pub trait RegisterIo: std::fmt::Debug + Send + Sync {
    fn read(&self, index: usize) -> u32;

    fn write(&self, index: usize, value: u32);

    /// Releases process-wide resources held by the backend. Called once
    /// by [`RegisterBlock::close`].
    fn release(&self) {}
}

impl<T: RegisterIo + ?Sized> RegisterIo for std::sync::Arc<T> {
    #[inline(always)]
    fn read(&self, index: usize) -> u32 {
        (**self).read(index)
    }

    #[inline(always)]
    fn write(&self, index: usize, value: u32) {
        (**self).write(index, value)
    }

    fn release(&self) {
        (**self).release()
    }
}

/// How pull resistors are configured on this SoC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullProtocol {
    /// BCM2835..2837: GPPUD + GPPUDCLK clocked sequence.
    Clocked,
    /// BCM2711: 2-bit field per pin in the pull control registers.
    Direct,
}

impl PullProtocol {
    /// The pull control registers of older SoCs are unimplemented and read
    /// back as a fixed magic value.
    pub fn detect(io: &dyn RegisterIo) -> Self {
        if io.read(layout::GPIO_PUP_PDN_CNTRL_REG3) == layout::BCM283X_PULL_MAGIC {
            PullProtocol::Clocked
        } else {
            PullProtocol::Direct
        }
    }
}

/// The GPIO register page shared by every pin of a [`Gpio`](crate::Gpio).
#[derive(Debug)]
pub struct RegisterBlock {
    io: Box<dyn RegisterIo>,
    lock: Mutex<()>,
    pull: PullProtocol,
    settle: Duration,
    closed: AtomicBool,
}

impl RegisterBlock {
    pub(crate) fn new(io: Box<dyn RegisterIo>, pull: Option<PullProtocol>, settle: Duration) -> Self {
        let pull = pull.unwrap_or_else(|| PullProtocol::detect(io.as_ref()));
        log::debug!("register block ready, pull protocol {:?}", pull);
        Self {
            io,
            lock: Mutex::new(()),
            pull,
            settle,
            closed: AtomicBool::new(false),
        }
    }

    pub fn pull_protocol(&self) -> PullProtocol {
        self.pull
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invalidates the block. Later accesses panic. Calling it again does
    /// nothing.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.io.release();
        }
    }

    #[inline]
    fn io(&self) -> &dyn RegisterIo {
        assert!(!self.is_closed(), "gpio register block used after close");
        self.io.as_ref()
    }

    #[inline]
    pub fn read(&self, index: usize) -> u32 {
        self.io().read(index)
    }

    #[inline]
    pub fn write(&self, index: usize, value: u32) {
        self.io().write(index, value)
    }

    /// Runs `f` with exclusive access for multi-register sequences.
    pub fn with_lock<T>(&self, f: impl FnOnce(&LockedRegisters<'_>) -> T) -> T {
        let io = self.io();
        // A panic inside a sequence leaves the registers as they are; the
        // lock itself carries no data worth rejecting.
        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        f(&LockedRegisters {
            io,
            settle: self.settle,
            _guard: guard,
        })
    }

    pub fn mode(&self, pin: u8) -> Mode {
        let (reg, shift) = layout::fsel_field(pin);
        Mode::from_bits((self.read(reg) >> shift) & layout::FSEL_MASK)
    }

    pub fn set_mode(&self, pin: u8, mode: Mode) {
        let (reg, shift) = layout::fsel_field(pin);
        self.with_lock(|regs| {
            let v = regs.read(reg) & !(layout::FSEL_MASK << shift);
            regs.write(reg, v | (mode.bits() << shift));
        })
    }

    pub fn level(&self, pin: u8) -> bool {
        let (bank, bit) = layout::bank_bit(pin);
        self.read(layout::GPLEV0 + bank) & bit != 0
    }

    pub fn set_level(&self, pin: u8, high: bool) {
        let (bank, bit) = layout::bank_bit(pin);
        if high {
            self.write(layout::GPSET0 + bank, bit);
        } else {
            self.write(layout::GPCLR0 + bank, bit);
        }
    }

    pub fn set_pull(&self, pin: u8, pull: Pull) {
        match self.pull {
            PullProtocol::Clocked => self.with_lock(|regs| {
                let (bank, bit) = layout::bank_bit(pin);
                let code = match pull {
                    Pull::None => 0,
                    Pull::Down => 1,
                    Pull::Up => 2,
                };
                regs.write(layout::GPPUD, code);
                regs.settle();
                regs.write(layout::GPPUDCLK0 + bank, bit);
                regs.settle();
                regs.write(layout::GPPUD, 0);
                regs.write(layout::GPPUDCLK0 + bank, 0);
            }),
            PullProtocol::Direct => self.with_lock(|regs| {
                let (reg, shift) = layout::pull_field(pin);
                let code = match pull {
                    Pull::None => 0,
                    Pull::Up => 1,
                    Pull::Down => 2,
                };
                let v = regs.read(reg) & !(layout::PULL_MASK << shift);
                regs.write(reg, v | (code << shift));
            }),
        }
    }
}

impl Drop for RegisterBlock {
    fn drop(&mut self) {
        self.close();
    }
}

/// Register access while holding the [`RegisterBlock`] lock.
pub struct LockedRegisters<'a> {
    io: &'a dyn RegisterIo,
    settle: Duration,
    _guard: MutexGuard<'a, ()>,
}

impl LockedRegisters<'_> {
    #[inline]
    pub fn read(&self, index: usize) -> u32 {
        self.io.read(index)
    }

    #[inline]
    pub fn write(&self, index: usize, value: u32) {
        self.io.write(index, value)
    }

    /// Busy-waits for the configured settle delay.
    pub fn settle(&self) {
        let start = Instant::now();
        while start.elapsed() < self.settle {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{RegisterWrite, SimulatedRegisters};

    fn block(sim: &Arc<SimulatedRegisters>, settle: Duration) -> RegisterBlock {
        RegisterBlock::new(Box::new(sim.clone()), None, settle)
    }

    #[test]
    fn detects_pull_protocol() {
        let old = Arc::new(SimulatedRegisters::bcm2835());
        assert_eq!(block(&old, Duration::ZERO).pull_protocol(), PullProtocol::Clocked);

        let new = Arc::new(SimulatedRegisters::bcm2711());
        assert_eq!(block(&new, Duration::ZERO).pull_protocol(), PullProtocol::Direct);
    }

    #[test]
    fn set_mode_keeps_neighbouring_fields() {
        let sim = Arc::new(SimulatedRegisters::bcm2835());
        let regs = block(&sim, Duration::ZERO);

        regs.set_mode(10, Mode::Alt0);
        regs.set_mode(12, Mode::Output);
        regs.set_mode(11, Mode::Alt5);

        assert_eq!(regs.mode(10), Mode::Alt0);
        assert_eq!(regs.mode(11), Mode::Alt5);
        assert_eq!(regs.mode(12), Mode::Output);
        assert_eq!(sim.peek(layout::GPFSEL0 + 1), 0b001_010_100);
    }

    #[test]
    fn clocked_pull_sequence() {
        let sim = Arc::new(SimulatedRegisters::bcm2835());
        let regs = block(&sim, Duration::ZERO);
        sim.clear_log();

        regs.set_pull(33, Pull::Up);

        let writes: Vec<_> = sim.log();
        assert_eq!(
            writes,
            vec![
                RegisterWrite { index: layout::GPPUD, value: 2 },
                RegisterWrite { index: layout::GPPUDCLK0 + 1, value: 1 << 1 },
                RegisterWrite { index: layout::GPPUD, value: 0 },
                RegisterWrite { index: layout::GPPUDCLK0 + 1, value: 0 },
            ]
        );
        assert_eq!(sim.pull(33), Pull::Up);
    }

    #[test]
    fn direct_pull_field() {
        let sim = Arc::new(SimulatedRegisters::bcm2711());
        let regs = block(&sim, Duration::ZERO);

        regs.set_pull(17, Pull::Down);
        regs.set_pull(18, Pull::Up);
        assert_eq!(sim.peek(layout::GPIO_PUP_PDN_CNTRL_REG0 + 1), (2 << 2) | (1 << 4));

        regs.set_pull(17, Pull::None);
        assert_eq!(sim.peek(layout::GPIO_PUP_PDN_CNTRL_REG0 + 1), 1 << 4);
        assert_eq!(sim.pull(18), Pull::Up);
    }

    #[test]
    fn concurrent_pulls_do_not_interleave() {
        let sim = Arc::new(SimulatedRegisters::bcm2835());
        let regs = Arc::new(block(&sim, Duration::from_millis(20)));
        sim.clear_log();

        let threads: Vec<_> = [(4u8, Pull::Up), (5u8, Pull::Down)]
            .into_iter()
            .map(|(pin, pull)| {
                let regs = regs.clone();
                std::thread::spawn(move || regs.set_pull(pin, pull))
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let log = sim.log();
        assert_eq!(log.len(), 8);
        for seq in log.chunks(4) {
            // Each locked sequence is contiguous: code, clock, reset, reset.
            assert_eq!(seq[0].index, layout::GPPUD);
            assert_ne!(seq[0].value, 0);
            assert_eq!(seq[1].index, layout::GPPUDCLK0);
            assert_eq!(seq[2], RegisterWrite { index: layout::GPPUD, value: 0 });
            assert_eq!(seq[3], RegisterWrite { index: layout::GPPUDCLK0, value: 0 });
        }
        // Completion order matches acquisition order: the first sequence's
        // clock bit belongs to the pull code it started with.
        let first = if log[0].value == 2 { 1 << 4 } else { 1 << 5 };
        assert_eq!(log[1].value, first);
        assert_eq!(sim.pull(4), Pull::Up);
        assert_eq!(sim.pull(5), Pull::Down);
    }

    #[test]
    #[should_panic(expected = "used after close")]
    fn access_after_close_panics() {
        let sim = Arc::new(SimulatedRegisters::bcm2835());
        let regs = block(&sim, Duration::ZERO);
        regs.close();
        regs.close();
        let _ = regs.level(3);
    }
}
