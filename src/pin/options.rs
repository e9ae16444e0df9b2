use std::fmt;

/// Function of a pin, as held in its function select field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl Mode {
    pub(crate) const fn bits(self) -> u32 {
        match self {
            Mode::Input => 0b000,
            Mode::Output => 0b001,
            Mode::Alt0 => 0b100,
            Mode::Alt1 => 0b101,
            Mode::Alt2 => 0b110,
            Mode::Alt3 => 0b111,
            Mode::Alt4 => 0b011,
            Mode::Alt5 => 0b010,
        }
    }

    /// Only the low three bits are significant.
    pub(crate) const fn from_bits(bits: u32) -> Self {
        match bits & 0b111 {
            0b000 => Mode::Input,
            0b001 => Mode::Output,
            0b100 => Mode::Alt0,
            0b101 => Mode::Alt1,
            0b110 => Mode::Alt2,
            0b111 => Mode::Alt3,
            0b011 => Mode::Alt4,
            _ => Mode::Alt5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub const fn new(is_high: bool) -> Self {
        if is_high {
            Self::High
        } else {
            Self::Low
        }
    }

    pub const fn is_high(&self) -> bool {
        matches!(self, Level::High)
    }
}

impl std::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    #[inline(always)]
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}

impl From<Level> for bool {
    #[inline(always)]
    fn from(value: Level) -> Self {
        value.is_high()
    }
}

/// Pull resistor state of a pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Pull {
    Up,
    Down,
    #[default]
    None,
}

/// Level transitions that raise an interrupt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Edge {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// The value written to the sysfs `edge` node.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }

    /// Whether a change from `from` to `to` fires this edge.
    pub fn matches(&self, from: Level, to: Level) -> bool {
        match (self, from, to) {
            (Edge::Rising | Edge::Both, Level::Low, Level::High) => true,
            (Edge::Falling | Edge::Both, Level::High, Level::Low) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_bits_are_a_bijection() {
        let modes = [
            Mode::Input,
            Mode::Output,
            Mode::Alt0,
            Mode::Alt1,
            Mode::Alt2,
            Mode::Alt3,
            Mode::Alt4,
            Mode::Alt5,
        ];
        for mode in modes {
            assert_eq!(Mode::from_bits(mode.bits()), mode);
        }
        let mut bits: Vec<_> = modes.iter().map(|m| m.bits()).collect();
        bits.sort();
        assert_eq!(bits, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn edges() {
        assert!(Edge::Rising.matches(Level::Low, Level::High));
        assert!(!Edge::Rising.matches(Level::High, Level::Low));
        assert!(Edge::Falling.matches(Level::High, Level::Low));
        assert!(Edge::Both.matches(Level::High, Level::Low));
        assert!(!Edge::Both.matches(Level::High, Level::High));
        assert!(!Edge::None.matches(Level::Low, Level::High));
        assert_eq!(Edge::Falling.to_string(), "falling");
    }

    #[test]
    fn level_not() {
        assert_eq!(!Level::Low, Level::High);
        assert_eq!(!!Level::High, Level::High);
        assert!(bool::from(Level::from(true)));
    }
}
