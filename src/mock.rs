//! Simulated backends for testing code that uses this crate without a
//! Raspberry Pi.
//!
//! [`SimulatedRegisters`] models the GPIO peripheral closely enough for
//! mode, level and pull logic to behave as on hardware. [`MockControl`]
//! stands in for the sysfs export interface and raises edge notifications
//! through a pipe when a pin is [driven](MockControl::drive).

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::{self, Read, Write},
    os::fd::{AsFd, BorrowedFd},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use nix::fcntl::OFlag;

use crate::{
    errors::Result,
    pin::options::{Edge, Level, Mode, Pull},
    registers::{layout, RegisterIo},
    sysfs::{parse_level, ExportControl, ValueNode},
    Config, Gpio,
};

/// A single register write seen by [`SimulatedRegisters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub index: usize,
    pub value: u32,
}

/// An in-memory GPIO peripheral.
#[derive(Debug)]
pub struct SimulatedRegisters {
    state: Mutex<SimState>,
}

#[derive(Debug)]
struct SimState {
    words: Vec<u32>,
    clocked: bool,
    latch: u64,
    clocked_pulls: [Pull; layout::GPIO_PIN_MAX as usize],
    external: HashMap<u8, Level>,
    links: HashMap<u8, u8>,
    log: Vec<RegisterWrite>,
    driven: Vec<Vec<Option<Level>>>,
}

impl SimulatedRegisters {
    /// A BCM2835..2837: clocked pull protocol.
    pub fn bcm2835() -> Self {
        let mut state = SimState::new(true);
        state.words[layout::GPIO_PUP_PDN_CNTRL_REG3] = layout::BCM283X_PULL_MAGIC;
        Self {
            state: Mutex::new(state),
        }
    }

    /// A BCM2711: direct pull control registers.
    pub fn bcm2711() -> Self {
        Self {
            state: Mutex::new(SimState::new(false)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw register contents, bypassing read side effects.
    pub fn peek(&self, index: usize) -> u32 {
        self.state().words[index]
    }

    pub fn log(&self) -> Vec<RegisterWrite> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear()
    }

    /// Pull resistor currently applied to `pin`.
    pub fn pull(&self, pin: u8) -> Pull {
        self.state().pull(pin)
    }

    /// Drive an input from outside the SoC.
    pub fn drive(&self, pin: u8, level: Level) {
        self.state().external.insert(pin, level);
    }

    pub fn release(&self, pin: u8) {
        self.state().external.remove(&pin);
    }

    /// Wire output `from` to input `to`.
    pub fn connect(&self, from: u8, to: u8) {
        self.state().links.insert(to, from);
    }

    /// Output levels driven by `pin` after each change, `None` while it is
    /// not an output. Starts with the reset state.
    pub fn driven_history(&self, pin: u8) -> Vec<Option<Level>> {
        self.state().driven[pin as usize].clone()
    }
}

impl SimState {
    fn new(clocked: bool) -> Self {
        Self {
            words: vec![0; layout::BLOCK_WORDS],
            clocked,
            latch: 0,
            clocked_pulls: [Pull::None; layout::GPIO_PIN_MAX as usize],
            external: HashMap::new(),
            links: HashMap::new(),
            log: Vec::new(),
            driven: vec![vec![None]; layout::GPIO_PIN_MAX as usize],
        }
    }

    fn mode(&self, pin: u8) -> Mode {
        let (reg, shift) = layout::fsel_field(pin);
        Mode::from_bits(self.words[reg] >> shift)
    }

    fn latched(&self, pin: u8) -> bool {
        self.latch & (1u64 << pin) != 0
    }

    fn pull(&self, pin: u8) -> Pull {
        if self.clocked {
            return self.clocked_pulls[pin as usize];
        }
        let (reg, shift) = layout::pull_field(pin);
        match (self.words[reg] >> shift) & layout::PULL_MASK {
            1 => Pull::Up,
            2 => Pull::Down,
            _ => Pull::None,
        }
    }

    fn level(&self, pin: u8) -> bool {
        if self.mode(pin) == Mode::Output {
            return self.latched(pin);
        }
        if let Some(&from) = self.links.get(&pin) {
            if self.mode(from) == Mode::Output {
                return self.latched(from);
            }
        }
        if let Some(level) = self.external.get(&pin) {
            return level.is_high();
        }
        self.pull(pin) == Pull::Up
    }

    fn bank(&self, bank: usize) -> u32 {
        (0..32u8)
            .map(|bit| bank as u8 * 32 + bit)
            .filter(|&pin| pin < layout::GPIO_PIN_MAX && self.level(pin))
            .fold(0u32, |acc, pin| acc | 1u32 << (pin % 32))
    }

    fn record_driven(&mut self) {
        for pin in 0..layout::GPIO_PIN_MAX {
            let now = (self.mode(pin) == Mode::Output).then(|| Level::new(self.latched(pin)));
            let history = &mut self.driven[pin as usize];
            if history.last() != Some(&now) {
                history.push(now);
            }
        }
    }
}

impl RegisterIo for SimulatedRegisters {
    fn read(&self, index: usize) -> u32 {
        assert!(index < layout::BLOCK_WORDS, "register index {index} out of range");
        let state = self.state();
        match index {
            i if (layout::GPLEV0..layout::GPLEV0 + 2).contains(&i) => state.bank(i - layout::GPLEV0),
            i if (layout::GPSET0..layout::GPSET0 + 2).contains(&i) => 0,
            i if (layout::GPCLR0..layout::GPCLR0 + 2).contains(&i) => 0,
            i => state.words[i],
        }
    }

    fn write(&self, index: usize, value: u32) {
        assert!(index < layout::BLOCK_WORDS, "register index {index} out of range");
        let mut state = self.state();
        state.log.push(RegisterWrite { index, value });

        let pull_regs = layout::GPIO_PUP_PDN_CNTRL_REG0..=layout::GPIO_PUP_PDN_CNTRL_REG3;
        match index {
            i if (layout::GPSET0..layout::GPSET0 + 2).contains(&i) => {
                state.latch |= (value as u64) << (32 * (i - layout::GPSET0));
            }
            i if (layout::GPCLR0..layout::GPCLR0 + 2).contains(&i) => {
                state.latch &= !((value as u64) << (32 * (i - layout::GPCLR0)));
            }
            i if (layout::GPLEV0..layout::GPLEV0 + 2).contains(&i) => {}
            i if state.clocked && pull_regs.contains(&i) => {}
            i if state.clocked && (layout::GPPUDCLK0..layout::GPPUDCLK0 + 2).contains(&i) => {
                let pull = match state.words[layout::GPPUD] & layout::PULL_MASK {
                    1 => Pull::Down,
                    2 => Pull::Up,
                    _ => Pull::None,
                };
                let base = 32 * (i - layout::GPPUDCLK0);
                for bit in (0..32).filter(|&bit| value & (1u32 << bit) != 0) {
                    if let Some(slot) = state.clocked_pulls.get_mut(base + bit) {
                        *slot = pull;
                    }
                }
                state.words[i] = value;
            }
            i => state.words[i] = value,
        }
        state.record_driven();
    }
}

/// An in-memory sysfs export interface.
#[derive(Debug, Default)]
pub struct MockControl {
    state: Mutex<ControlState>,
}

#[derive(Debug, Default)]
struct ControlState {
    exported: HashMap<u8, ExportedPin>,
    levels: HashMap<u8, Level>,
    busy: HashSet<u8>,
    never_writable: HashSet<u8>,
    writable_delay: u32,
}

#[derive(Debug)]
struct ExportedPin {
    edge: Edge,
    polls: u32,
    notify: Option<File>,
}

impl MockControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `pin` look exported by another process.
    pub fn mark_busy(&self, pin: u8) {
        self.state().busy.insert(pin);
    }

    /// Keep the nodes of `pin` read-only, as if the permission fixup never
    /// ran.
    pub fn set_never_writable(&self, pin: u8, never: bool) {
        let mut state = self.state();
        if never {
            state.never_writable.insert(pin);
        } else {
            state.never_writable.remove(&pin);
        }
    }

    /// Number of writability checks that fail after each export.
    pub fn set_writable_delay(&self, polls: u32) {
        self.state().writable_delay = polls;
    }

    pub fn edge(&self, pin: u8) -> Option<Edge> {
        self.state().exported.get(&pin).map(|p| p.edge)
    }

    /// Set the level seen on `pin`, notifying an open value node if the
    /// transition matches its edge.
    pub fn drive(&self, pin: u8, level: Level) {
        let mut state = self.state();
        let old = state.levels.insert(pin, level).unwrap_or_default();
        if let Some(exported) = state.exported.get_mut(&pin) {
            if exported.edge.matches(old, level) {
                if let Some(notify) = &mut exported.notify {
                    let _ = notify.write_all(level_byte(level));
                }
            }
        }
    }
}

impl ExportControl for MockControl {
    fn export(&self, pin: u8) -> io::Result<()> {
        let mut state = self.state();
        if pin >= layout::GPIO_PIN_MAX {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        if state.busy.contains(&pin) || state.exported.contains_key(&pin) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        state.exported.insert(
            pin,
            ExportedPin {
                edge: Edge::None,
                polls: 0,
                notify: None,
            },
        );
        Ok(())
    }

    fn unexport(&self, pin: u8) -> io::Result<()> {
        match self.state().exported.remove(&pin) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    fn is_exported(&self, pin: u8) -> bool {
        self.state().exported.contains_key(&pin)
    }

    fn is_writable(&self, pin: u8) -> bool {
        let mut state = self.state();
        if state.never_writable.contains(&pin) {
            return false;
        }
        let delay = state.writable_delay;
        match state.exported.get_mut(&pin) {
            Some(exported) => {
                exported.polls += 1;
                exported.polls > delay
            }
            None => false,
        }
    }

    fn set_edge(&self, pin: u8, edge: Edge) -> io::Result<()> {
        let mut state = self.state();
        let exported = state
            .exported
            .get_mut(&pin)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        exported.edge = edge;
        Ok(())
    }

    fn open_value(&self, pin: u8) -> io::Result<Box<dyn ValueNode>> {
        let mut state = self.state();
        let level = state.levels.get(&pin).copied().unwrap_or_default();
        let exported = state
            .exported
            .get_mut(&pin)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;

        let (rx, tx) = nix::unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        let mut tx = File::from(tx);
        // Sysfs reports a fresh value node as ready before any edge.
        tx.write_all(level_byte(level))?;
        exported.notify = Some(tx);

        Ok(Box::new(MockValue {
            rx: File::from(rx),
            last: Mutex::new(level),
        }))
    }
}

fn level_byte(level: Level) -> &'static [u8] {
    if level.is_high() {
        b"1"
    } else {
        b"0"
    }
}

#[derive(Debug)]
struct MockValue {
    rx: File,
    last: Mutex<Level>,
}

impl AsFd for MockValue {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.rx.as_fd()
    }
}

impl ValueNode for MockValue {
    fn read_level(&self) -> io::Result<Level> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = [0u8; 16];
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => *last = parse_level(&buf[n - 1..n])?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
        Ok(*last)
    }
}

/// Settings suited to the mocks: short export timeout, no pull settle.
pub fn config() -> Config {
    Config::new()
        .with_export_timeout(Duration::from_millis(100))
        .with_export_poll(Duration::from_millis(1))
        .with_pull_settle(Duration::ZERO)
}

/// A [`Gpio`] over a simulated BCM2835 and a mock export interface.
pub fn open() -> Result<(Gpio, Arc<SimulatedRegisters>, Arc<MockControl>)> {
    let sim = Arc::new(SimulatedRegisters::bcm2835());
    let (gpio, control) = open_with(sim.clone())?;
    Ok((gpio, sim, control))
}

pub fn open_with(sim: Arc<SimulatedRegisters>) -> Result<(Gpio, Arc<MockControl>)> {
    let control = Arc::new(MockControl::new());
    let gpio = Gpio::with_backend(Box::new(sim), control.clone(), &config())?;
    Ok((gpio, control))
}
