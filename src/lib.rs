// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `gpio-mem` crate drives the GPIO pins of BCM283x and BCM2711 based
//! boards (the Raspberry Pi family) by mapping the peripheral's register
//! page through `/dev/gpiomem`, and delivers edge interrupts through the
//! sysfs GPIO interface.
//!
//! Register access is a plain volatile load or store, so reading and writing
//! pins costs no system call. Interrupts are slower: a pin being watched is
//! exported under `/sys/class/gpio`, its `edge` node is set and its `value`
//! node is polled with epoll by a [`Watcher`] thread that calls the
//! registered handler.
//!
//! # Examples
//!
//! Mirror one input pin onto an output pin, on every edge:
//!
//! ```no_run
//! use gpio_mem::{Edge, Gpio, Level};
//!
//! # fn main() -> Result<(), gpio_mem::Error> {
//! let gpio = Gpio::open()?;
//!
//! let led = gpio.pin(17)?;
//! led.write(Level::Low);
//! led.output();
//!
//! let button = gpio.pin(27)?;
//! button.input();
//! button.pull_up();
//! button.watch(Edge::Both, move |pin| {
//!     println!("pin {} is now {:?}", pin.number(), pin.read());
//! })?;
//!
//! for _ in 0..10 {
//!     led.toggle();
//!     std::thread::sleep(std::time::Duration::from_millis(500));
//! }
//!
//! gpio.close();
//! # Ok(()) }
//! ```
//!
//! Only one [`Gpio`] backed by `/dev/gpiomem` can be open in a process at a
//! time. Tests and code that runs off the board can use the simulated
//! backends in [`mock`] (enable the `mock` feature outside this crate).

#![cfg_attr(docsrs, feature(doc_cfg))]

mod errors;

pub mod config;

pub mod gpio;

pub mod pin;

pub mod registers;

pub mod sysfs;

pub mod watcher;

#[cfg(any(test, feature = "mock"))]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod mock;

pub use config::Config;
pub use errors::Error;
pub use gpio::Gpio;
pub use pin::{
    options::{Edge, Level, Mode, Pull},
    Pin,
};
pub use registers::{MappedRegisters, PullProtocol, RegisterBlock, RegisterIo};
pub use sysfs::{ExportControl, Sysfs, ValueNode};
pub use watcher::{Handler, Watcher};
