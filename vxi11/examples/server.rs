use std::{io, net::IpAddr};

use async_std::net::TcpListener;
use futures::try_join;
use lxi_device::{status::Sender, util::SimulatedDevice};
use lxi_vxi11::server::vxi11::prelude::*;

use clap::Parser;

/// Demo VXI-11 server with two simulated instruments (`inst0` and `gpib0,3`)
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[clap(default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Port of the core channel
    #[clap(short, long, default_value_t = 4322)]
    core_port: u16,

    /// Port of the async/abort channel
    #[clap(short, long, default_value_t = 4323)]
    async_port: u16,

    /// Log level
    #[clap(short, long, default_value = "info")]
    log: log::LevelFilter,
}

#[async_std::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();
    femme::with_level(args.log);

    let core_listener = TcpListener::bind((args.ip, args.core_port)).await?;
    let async_listener = TcpListener::bind((args.ip, args.async_port)).await?;

    let parse = |s: &str| {
        s.parse::<DeviceAddress>()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
    };

    let (vxi11_core, vxi11_async) = VxiServerBuilder::new()
        .core_port(core_listener.local_addr()?.port())
        .async_port(async_listener.local_addr()?.port())
        .device(parse("inst0")?, SimulatedDevice::new_arc(), Sender::new())
        .device(
            parse("gpib0,3")?,
            SimulatedDevice::new()
                .with_idn(b"Simulated,GPIB instrument,0,1.0\n")
                .into_arc(),
            Sender::new(),
        )
        .build();

    println!("Running server ...");
    try_join!(
        vxi11_core.serve(core_listener),
        vxi11_async.serve(async_listener)
    )
    .map(|_| ())
}
