use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands;
use crate::env_loader;

#[derive(Debug, Parser)]
#[command(name = "autothread")]
#[command(about = "Keeps one open inbox topic per Telegram forum and archives finished exchanges")]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(RunArgs),
    Status,
    Stop,
}

#[derive(Debug, Args, Default)]
pub struct RunArgs {
    #[arg(long)]
    pub once: bool,
    #[arg(long)]
    pub daemon: bool,
    #[arg(long)]
    pub interval: Option<u64>,
    #[arg(long)]
    pub dry_run: bool,
}

fn print_report(report: &commands::CommandReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("command: {}", report.command);
    println!("ok: {}", report.ok);
    if !report.details.is_empty() {
        println!("details:");
        for detail in &report.details {
            println!("- {detail}");
        }
    }
    if !report.issues.is_empty() {
        println!("issues:");
        for issue in &report.issues {
            println!("- {issue}");
        }
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let _ = env_loader::load_dotenv();
    let cli = Cli::parse();

    let report = match &cli.command {
        Command::Run(args) => commands::run::run(&commands::run::RunFlags {
            once: args.once,
            daemon: args.daemon,
            interval_secs: args.interval,
            dry_run: args.dry_run,
        })?,
        Command::Status => commands::status::run()?,
        Command::Stop => commands::stop::run()?,
    };

    print_report(&report, cli.json)?;

    if report.ok {
        Ok(())
    } else {
        std::process::exit(2);
    }
}
