mod info;
mod install;

pub use info::Info;
pub use install::Install;

use clap::{ColorChoice, Parser, Subcommand};

/// Download, decrypt and install PKG packages with resume support.
#[derive(Debug, Clone, Parser)]
#[command(version, author = "clitic <clitic21@gmail.com>", about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Only print errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print debug logs. Use twice for trace logs.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Info(Info),
    Install(Install),
}
