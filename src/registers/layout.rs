// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Register map of the BCM283x / BCM2711 GPIO peripheral.
//!
//! All indices are 32-bit word offsets from the start of the peripheral page.

/// Size of the mapped register page in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Number of 32-bit words in the register page.
pub const BLOCK_WORDS: usize = BLOCK_SIZE / 4;

/// Number of GPIO lines exposed by the peripheral.
pub const GPIO_PIN_MAX: u8 = 54;

/// Function select registers, 10 pins per register, 3 bits per pin.
pub const GPFSEL0: usize = 0;
/// Output set registers (write 1 to set).
pub const GPSET0: usize = 7;
/// Output clear registers (write 1 to clear).
pub const GPCLR0: usize = 10;
/// Pin level registers.
pub const GPLEV0: usize = 13;
/// Pull-up/down enable register (BCM2835..2837).
pub const GPPUD: usize = 37;
/// Pull-up/down clock registers (BCM2835..2837).
pub const GPPUDCLK0: usize = 38;
/// Pull-up/down control registers, 16 pins per register (BCM2711).
pub const GPIO_PUP_PDN_CNTRL_REG0: usize = 57;
/// Last pull control register. Reads back as [`BCM283X_PULL_MAGIC`] on SoCs
/// without direct pull control.
pub const GPIO_PUP_PDN_CNTRL_REG3: usize = 60;

/// "gpio" in ASCII, returned by unimplemented registers on BCM283x.
pub const BCM283X_PULL_MAGIC: u32 = 0x6770_696f;

pub const FSEL_MASK: u32 = 0b111;
pub const PULL_MASK: u32 = 0b11;

/// Register index and bit shift of a pin's function select field.
#[inline(always)]
pub const fn fsel_field(pin: u8) -> (usize, u32) {
    (GPFSEL0 + pin as usize / 10, (pin as u32 % 10) * 3)
}

/// Bank offset and bit mask of a pin in the 32-pin bitmap registers.
#[inline(always)]
pub const fn bank_bit(pin: u8) -> (usize, u32) {
    (pin as usize / 32, 1 << (pin % 32))
}

/// Register index and bit shift of a pin's direct pull control field.
#[inline(always)]
pub const fn pull_field(pin: u8) -> (usize, u32) {
    (
        GPIO_PUP_PDN_CNTRL_REG0 + pin as usize / 16,
        (pin as u32 % 16) * 2,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fsel_packs_ten_pins_per_register() {
        assert_eq!(fsel_field(0), (0, 0));
        assert_eq!(fsel_field(9), (0, 27));
        assert_eq!(fsel_field(10), (1, 0));
        assert_eq!(fsel_field(53), (5, 9));
    }

    #[test]
    fn banks_split_at_32() {
        assert_eq!(bank_bit(7), (0, 1 << 7));
        assert_eq!(bank_bit(31), (0, 1 << 31));
        assert_eq!(bank_bit(32), (1, 1));
        assert_eq!(GPSET0 + bank_bit(40).0, 8);
    }

    #[test]
    fn direct_pull_fields() {
        assert_eq!(pull_field(0), (57, 0));
        assert_eq!(pull_field(15), (57, 30));
        assert_eq!(pull_field(16), (58, 0));
        assert_eq!(pull_field(53), (60, 10));
    }
}
