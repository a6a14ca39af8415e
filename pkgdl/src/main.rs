mod commands;
mod logger;
mod progress;
mod utils;

use clap::{ColorChoice, Parser};
use colored::Colorize;
use commands::{Args, Commands};
use logger::Logger;
use std::{
    io::{IsTerminal, stderr},
    process,
};

static LOGGER: Logger = Logger;

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    colored::control::set_override(match args.color {
        ColorChoice::Always => true,
        ColorChoice::Auto => stderr().is_terminal(),
        ColorChoice::Never => false,
    });

    log::set_logger(&LOGGER)?;
    log::set_max_level(logger::level_filter(args.quiet, args.verbose));

    match args.command {
        Commands::Info(args) => args.execute()?,
        Commands::Install(args) => args.execute()?,
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".bold().red(), e);
        process::exit(1);
    }
}
