// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use gpio_mem::{Config, Gpio, Level};
use quicli::prelude::*;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::{Duration, Instant};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// BCM number of the GPIO pin to blink
    pin: u8,
    /// Period in milliseconds
    period_ms: u64,
    /// Duration over which to blink in milliseconds
    duration_ms: u64,
    /// The GPIO memory device
    #[structopt(long, default_value = "/dev/gpiomem", parse(from_os_str))]
    device: PathBuf,
}

fn do_main(args: Cli) -> Result<(), gpio_mem::Error> {
    let gpio = Gpio::open_with(Config::new().with_device(&args.device, 0))?;
    let pin = gpio.pin(args.pin)?;

    // Latch the level first so the pin comes up low.
    pin.write(Level::Low);
    pin.output();

    let period = Duration::from_millis(args.period_ms);
    let duration = Duration::from_millis(args.duration_ms);
    let start_time = Instant::now();
    while start_time.elapsed() < duration {
        sleep(period);
        pin.toggle();
    }

    pin.low();
    pin.input();
    gpio.close();
    Ok(())
}

fn main() -> CliResult {
    let args = Cli::from_args();
    do_main(args).or_else(|e| {
        error!("{:?}", e);
        Ok(())
    })
}
