use std::sync::Arc;

use crate::{errors::Result, gpio::Context};

pub mod options;

use options::{Edge, Level, Mode, Pull};

/// A handle to one GPIO line of an open [`Gpio`](crate::Gpio).
///
/// Pins are cheap to create and clone. Mode, level and pull live in the
/// hardware. The last level written (the shadow) is kept per pin number in
/// the owning `Gpio`, so every handle to a pin, including the one passed to
/// a watch handler, sees the same shadow. Every method panics if the owning
/// `Gpio` has been closed.
#[derive(Debug, Clone)]
pub struct Pin {
    ctx: Arc<Context>,
    number: u8,
}

impl Pin {
    pub(crate) fn new(ctx: Arc<Context>, number: u8) -> Self {
        ctx.seed_shadow(number);
        Self { ctx, number }
    }

    /// BCM GPIO number of this pin.
    pub const fn number(&self) -> u8 {
        self.number
    }

    pub fn mode(&self) -> Mode {
        self.ctx.registers.mode(self.number)
    }

    pub fn set_mode(&self, mode: Mode) {
        self.ctx.registers.set_mode(self.number, mode)
    }

    #[inline]
    pub fn input(&self) {
        self.set_mode(Mode::Input)
    }

    #[inline]
    pub fn output(&self) {
        self.set_mode(Mode::Output)
    }

    /// Level on the pin. For an output this is the driven level.
    pub fn read(&self) -> Level {
        Level::new(self.ctx.registers.level(self.number))
    }

    /// Set the output latch. In input mode the level is held and driven once
    /// the pin is switched to output.
    pub fn write(&self, level: Level) {
        self.ctx.set_shadow(self.number, level);
        self.ctx.registers.set_level(self.number, level.is_high());
    }

    #[inline]
    pub fn high(&self) {
        self.write(Level::High)
    }

    #[inline]
    pub fn low(&self) {
        self.write(Level::Low)
    }

    pub fn toggle(&self) {
        let level = self.ctx.toggle_shadow(self.number);
        self.ctx.registers.set_level(self.number, level.is_high());
    }

    /// The level last written to this pin through any handle.
    pub fn shadow(&self) -> Level {
        self.ctx.shadow(self.number)
    }

    pub fn set_pull(&self, pull: Pull) {
        self.ctx.registers.set_pull(self.number, pull)
    }

    #[inline]
    pub fn pull_up(&self) {
        self.set_pull(Pull::Up)
    }

    #[inline]
    pub fn pull_down(&self) {
        self.set_pull(Pull::Down)
    }

    #[inline]
    pub fn pull_none(&self) {
        self.set_pull(Pull::None)
    }

    /// Call `handler` from the default watcher on every `edge` transition.
    ///
    /// The handler gets a clone of this pin taken at registration.
    pub fn watch<F>(&self, edge: Edge, handler: F) -> Result<()>
    where
        F: Fn(&Pin) + Send + Sync + 'static,
    {
        self.ctx.assert_open();
        self.ctx.watcher.register_pin(self, edge, handler)
    }

    /// Stop watching this pin. Does nothing if it is not watched.
    pub fn unwatch(&self) {
        self.ctx.assert_open();
        self.ctx.watcher.unregister_pin(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{self, SimulatedRegisters};
    use std::sync::Arc;

    #[test]
    fn write_updates_shadow_in_any_mode() {
        let (gpio, _sim, _ctl) = mock::open().unwrap();
        let pin = gpio.pin(7).unwrap();

        for mode in [Mode::Input, Mode::Output, Mode::Alt3] {
            pin.set_mode(mode);
            for level in [Level::High, Level::Low] {
                pin.write(level);
                assert_eq!(pin.shadow(), level);
            }
        }
    }

    #[test]
    fn output_reads_back_written_level() {
        let (gpio, _sim, _ctl) = mock::open().unwrap();
        let pin = gpio.pin(20).unwrap();
        pin.output();

        pin.high();
        assert_eq!(pin.read(), Level::High);
        pin.low();
        assert_eq!(pin.read(), Level::Low);
        pin.write(Level::High);
        assert_eq!(pin.read(), Level::High);
    }

    #[test]
    fn toggle_twice_restores_shadow() {
        let (gpio, _sim, _ctl) = mock::open().unwrap();
        let pin = gpio.pin(7).unwrap();
        pin.low();
        pin.output();

        pin.toggle();
        assert_eq!(pin.shadow(), Level::High);
        assert_eq!(pin.read(), Level::High);
        pin.toggle();
        assert_eq!(pin.shadow(), Level::Low);
        assert_eq!(pin.read(), Level::Low);
    }

    #[test]
    fn output_handoff_is_glitch_free() {
        let (gpio, sim, _ctl) = mock::open().unwrap();
        let pin = gpio.pin(7).unwrap();
        assert_eq!(pin.mode(), Mode::Input);

        pin.write(Level::High);
        pin.output();

        assert_eq!(pin.read(), Level::High);
        assert_eq!(sim.driven_history(7), vec![None, Some(Level::High)]);
    }

    #[test]
    fn looped_pins() {
        let (gpio, sim, _ctl) = mock::open().unwrap();
        let input = gpio.pin(22).unwrap();
        let output = gpio.pin(23).unwrap();
        sim.connect(23, 22);

        output.low();
        output.output();
        assert_eq!(input.read(), Level::Low);
        output.high();
        assert_eq!(input.read(), Level::High);
        output.toggle();
        assert_eq!(input.read(), Level::Low);
    }

    #[test]
    fn pulls_drive_floating_inputs() {
        let (gpio, sim, _ctl) = mock::open().unwrap();
        let pin = gpio.pin(7).unwrap();

        pin.pull_up();
        assert_eq!(sim.pull(7), Pull::Up);
        assert_eq!(pin.read(), Level::High);
        pin.pull_down();
        assert_eq!(pin.read(), Level::Low);
        pin.set_pull(Pull::Up);
        assert_eq!(pin.read(), Level::High);
        pin.pull_none();
        assert_eq!(sim.pull(7), Pull::None);
    }

    #[test]
    fn shadow_starts_at_hardware_level() {
        let sim = Arc::new(SimulatedRegisters::bcm2711());
        sim.drive(9, Level::High);
        let (gpio, _ctl) = mock::open_with(sim).unwrap();
        assert_eq!(gpio.pin(9).unwrap().shadow(), Level::High);
        assert_eq!(gpio.pin(10).unwrap().shadow(), Level::Low);
    }

    #[test]
    fn handles_share_the_shadow() {
        let (gpio, _sim, _ctl) = mock::open().unwrap();
        let a = gpio.pin(12).unwrap();
        let b = gpio.pin(12).unwrap();
        let c = a.clone();

        a.high();
        assert_eq!(b.shadow(), Level::High);
        assert_eq!(c.shadow(), Level::High);
        b.toggle();
        assert_eq!(a.shadow(), Level::Low);
        // A later handle does not reseed from the hardware.
        c.high();
        assert_eq!(gpio.pin(12).unwrap().shadow(), Level::High);
        assert_eq!(gpio.pin(13).unwrap().shadow(), Level::Low);
    }

    #[test]
    #[should_panic(expected = "after close")]
    fn use_after_close_panics() {
        let (gpio, _sim, _ctl) = mock::open().unwrap();
        let pin = gpio.pin(7).unwrap();
        gpio.close();
        let _ = pin.read();
    }
}
