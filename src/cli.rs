use clap::{Arg, ArgMatches, Command};
use colored::Colorize;
use rustyline::{
    Completer, CompletionType, Config, Editor, Helper, Highlighter, Hinter, Validator,
};

use crate::{control::Control, error::Result};

lazy_static::lazy_static! {
    static ref SHOW_COMMAND : Command = Command::new("show")
    .about("Show daemon state")
    .subcommand(Command::new("interfaces").about("List configured interfaces"))
    .subcommand(Command::new("neighbors").about("List neighbors"))
    .subcommand(Command::new("database").about("List link state database records"))
    .subcommand(Command::new("routes").about("Show the computed routing table"))
    .subcommand(Command::new("fib").about("Show routes handed to the forwarding table"));
    static ref FIB_COMMAND : Command = Command::new("fib")
    .about("Forwarding table coupling")
    .subcommand(Command::new("couple").about("Install computed routes into the kernel"))
    .subcommand(Command::new("decouple").about("Withdraw computed routes from the kernel"));
    static ref LOG_COMMAND : Command = Command::new("log")
    .about("Logging verbosity")
    .subcommand(Command::new("verbose").about("Log debug messages"))
    .subcommand(Command::new("brief").about("Log informational messages only"));
    static ref RELOAD_COMMAND : Command = Command::new("reload")
    .about("Reload the configuration file")
    .arg(Arg::new("file").help("Configuration file").required(true));
    static ref EXIT_COMMAND : Command = Command::new("exit")
    .about("Stop the daemon");
    static ref OSPF_COMMAND : Command = Command::new("ospf")
    .no_binary_name(true)
    .about("OSPF CLI")
    .subcommand(SHOW_COMMAND.clone())
    .subcommand(FIB_COMMAND.clone())
    .subcommand(LOG_COMMAND.clone())
    .subcommand(RELOAD_COMMAND.clone())
    .subcommand(EXIT_COMMAND.clone());
}

#[derive(Helper, Hinter, Validator, Highlighter, Completer)]
struct OspfHelper;

/// what the shell loop does after a command
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Continue,
    Exit,
}

async fn match_ospf_command(control: &Control, line: &str) -> Result<Next> {
    let matches = match OSPF_COMMAND
        .clone()
        .try_get_matches_from(line.split_whitespace())
    {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return Ok(Next::Continue);
        }
    };
    match matches.subcommand() {
        Some(("show", sub)) => match_show_command(control, sub).await?,
        Some(("fib", sub)) => match sub.subcommand_name() {
            Some("couple") => control.couple(true)?,
            Some("decouple") => control.couple(false)?,
            _ => {
                let _ = FIB_COMMAND.clone().print_help();
            }
        },
        Some(("log", sub)) => match sub.subcommand_name() {
            Some("verbose") => control.set_verbose(true)?,
            Some("brief") => control.set_verbose(false)?,
            _ => {
                let _ = LOG_COMMAND.clone().print_help();
            }
        },
        Some(("reload", sub)) => {
            if let Some(file) = sub.get_one::<String>("file") {
                match control.reload(file).await {
                    Ok(()) => println!("{}", "configuration reloaded".green()),
                    Err(err) => println!("{}", format!("reload failed: {err}").red()),
                }
            }
        }
        Some(("exit", _)) => return Ok(Next::Exit),
        _ => {
            let _ = OSPF_COMMAND.clone().print_help();
        }
    }
    Ok(Next::Continue)
}

async fn match_show_command(control: &Control, args_match: &ArgMatches) -> Result<()> {
    match args_match.subcommand_name() {
        Some("interfaces") => {
            println!(
                "{}",
                format!(
                    "{:<10} {:<16} {:<18} {:<10} {:<8} {:<16} {:>6} {:>5}",
                    "name", "area", "address", "type", "state", "dr", "metric", "nbrs"
                )
                .bold()
            );
            for i in control.interfaces().await? {
                let addr = format!("{}/{}", i.addr, crate::util::mask_to_prefixlen(i.mask));
                let state = if i.linkup {
                    format!("{:?}", i.state).green()
                } else {
                    format!("{:?}", i.state).red()
                };
                println!(
                    "{:<10} {:<16} {:<18} {:<10} {:<8} {:<16} {:>6} {:>2}/{:<2}",
                    i.name,
                    i.area,
                    addr,
                    format!("{:?}", i.network_type),
                    state,
                    i.dr,
                    i.metric,
                    i.adjacencies,
                    i.neighbors
                );
            }
        }
        Some("neighbors") => {
            println!(
                "{}",
                format!(
                    "{:<16} {:<16} {:<10} {:<10} {:>4} {:>6} {:>6} {:>6}",
                    "id", "address", "iface", "state", "pri", "dbsum", "req", "rxmt"
                )
                .bold()
            );
            for n in control.neighbors().await? {
                println!(
                    "{:<16} {:<16} {:<10} {:<10} {:>4} {:>6} {:>6} {:>6}",
                    n.id,
                    n.addr,
                    n.iface,
                    format!("{:?}", n.state),
                    n.priority,
                    n.db_sum_list,
                    n.ls_req_list,
                    n.ls_retrans_list
                );
            }
        }
        Some("database") => {
            println!(
                "{}",
                format!(
                    "{:<16} {:>4} {:<16} {:<16} {:>10} {:>6} {:>6}",
                    "area", "type", "ls id", "adv router", "seq", "age", "cksum"
                )
                .bold()
            );
            for e in control.database().await? {
                let area = e.area.map_or("AS".to_string(), |a| a.to_string());
                let line = format!(
                    "{:<16} {:>4} {:<16} {:<16} {:>#10x} {:>6} {:>#6x}",
                    area,
                    e.header.ls_type,
                    e.header.ls_id,
                    e.header.adv_rtr,
                    e.header.seq_num,
                    e.header.age,
                    e.header.checksum
                );
                if e.self_originated {
                    println!("{}", line.cyan());
                } else {
                    println!("{line}");
                }
            }
        }
        Some("routes") => {
            println!(
                "{}",
                format!(
                    "{:<20} {:<6} {:>8} {:<16} {:<10} {:<16}",
                    "destination", "path", "cost", "nexthop", "iface", "area"
                )
                .bold()
            );
            for r in control.routes().await? {
                let nexthop = if r.connected {
                    "connected".to_string()
                } else {
                    r.nexthop.to_string()
                };
                println!(
                    "{:<20} {:<6} {:>8} {:<16} {:<10} {:<16}",
                    r.key.to_string(),
                    r.path_type.to_string(),
                    r.cost,
                    nexthop,
                    r.ifname.as_deref().unwrap_or("-"),
                    r.area
                );
            }
        }
        Some("fib") => {
            for k in control.fib().await? {
                println!(
                    "{:<20} via {:<16} dev {:<10} metric {}",
                    k.prefix.to_string(),
                    k.nexthop,
                    k.ifname.as_deref().unwrap_or("-"),
                    k.metric
                );
            }
        }
        _ => {
            let _ = SHOW_COMMAND.clone().print_help();
        }
    }
    Ok(())
}

/// # cli
/// the interactive shell. returns when the operator exits or the input closes.
pub async fn cli(control: Control) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cmdline_config = Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .build();
    let mut cmdline_editor = Editor::<OspfHelper, _>::with_config(cmdline_config)?;
    cmdline_editor.set_helper(Some(OspfHelper));
    let prompt = format!("{}>>", control.router_id().await);
    loop {
        let readline = tokio::task::block_in_place(|| cmdline_editor.readline(&prompt));
        let Ok(line) = readline else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        cmdline_editor.add_history_entry(line.as_str())?;
        match match_ospf_command(&control, &line).await {
            Ok(Next::Exit) => break,
            Ok(Next::Continue) => {}
            Err(err) => println!("{}", err.to_string().red()),
        }
    }
    println!("Bye");
    Ok(())
}
