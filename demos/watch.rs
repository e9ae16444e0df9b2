// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use anyhow::Context;
use gpio_mem::{Edge, Gpio};
use std::sync::mpsc;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// BCM numbers of the GPIO pins to watch
    #[structopt(required = true)]
    pins: Vec<u8>,
    /// Edge to report: none, rising, falling or both
    #[structopt(long, default_value = "both", parse(try_from_str = parse_edge))]
    edge: Edge,
    /// Stop after this many events
    #[structopt(long, default_value = "10")]
    count: usize,
    /// Give up after this many seconds without an event
    #[structopt(long, default_value = "30")]
    timeout_s: u64,
}

fn parse_edge(s: &str) -> anyhow::Result<Edge> {
    Ok(match s {
        "none" => Edge::None,
        "rising" => Edge::Rising,
        "falling" => Edge::Falling,
        "both" => Edge::Both,
        _ => anyhow::bail!("unknown edge {s:?}"),
    })
}

fn main() -> anyhow::Result<()> {
    let args = Cli::from_args();
    let gpio = Gpio::open().context("failed to open gpio")?;

    let (tx, rx) = mpsc::channel();
    for &number in &args.pins {
        let pin = gpio.pin(number)?;
        pin.input();
        let tx = tx.clone();
        pin.watch(args.edge, move |pin| {
            let _ = tx.send((pin.number(), pin.read()));
        })
        .with_context(|| format!("failed to watch pin {number}"))?;
    }

    for _ in 0..args.count {
        let (number, level) = rx
            .recv_timeout(Duration::from_secs(args.timeout_s))
            .context("no edge seen")?;
        println!("pin {number}: {level:?}");
    }

    gpio.close();
    Ok(())
}
