use clap::{Arg, ArgAction, Command};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt};

use ospfd::{
    cli,
    config::Config,
    control::{self, Control},
    engine::Engine,
    fib::{self, Fib, IpCommandSink, MemorySink},
    interface::trans,
    rde::Rde,
};

fn command() -> Command {
    Command::new("ospfd")
        .version("1.0")
        .about("OSPFv2 routing daemon")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .default_value("/etc/ospfd.json")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Log debug messages"),
        )
        .arg(
            Arg::new("no-cli")
                .short('n')
                .long("no-cli")
                .action(ArgAction::SetTrue)
                .help("Run without the interactive shell"),
        )
        .arg(
            Arg::new("memory-fib")
                .short('m')
                .long("memory-fib")
                .action(ArgAction::SetTrue)
                .help("Keep computed routes in memory, never touch the kernel table"),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = command().get_matches();
    let (filter, log) = reload::Layer::new(control::log_filter(matches.get_flag("debug")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_default();
    let config = Config::load(&path)?;
    info!(router_id = %config.router_id, config = %path, "starting");

    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let (rde_tx, rde_rx) = mpsc::unbounded_channel();
    let (fib_tx, fib_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let control = Control::new(
        config.clone(),
        engine_tx.clone(),
        rde_tx.clone(),
        fib_tx.clone(),
        Some(log),
    );

    tokio::spawn(trans::run(out_rx, engine_tx.clone()));
    let engine = Engine::new(config.clone(), rde_tx.clone(), out_tx, engine_tx.clone());
    let engine_task = tokio::spawn(engine.run(engine_rx));
    let rde = Rde::new(config.clone(), rde_tx.clone(), engine_tx.clone(), fib_tx);
    let rde_task = tokio::spawn(rde.run(rde_rx));
    if matches.get_flag("memory-fib") {
        let fib = Fib::new(MemorySink::new(), config.fib_coupled, rde_tx.clone());
        tokio::spawn(fib.run(fib_rx));
    } else {
        let fib = Fib::new(IpCommandSink, config.fib_coupled, rde_tx.clone());
        tokio::spawn(fib.run(fib_rx));
    }
    tokio::spawn(fib::link::run(engine_tx, rde_tx));

    if matches.get_flag("no-cli") {
        tokio::signal::ctrl_c().await?;
    } else {
        cli::cli(control.clone()).await?;
    }

    control.shutdown();
    let _ = engine_task.await;
    let _ = rde_task.await;
    Ok(())
}
