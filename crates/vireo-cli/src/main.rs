//! Vireo unified CLI tool
//!
//! Single command-line interface for the Vireo runtime services:
//! the out-of-process JIT server and recorded event-log inspection.

use clap::{Parser, Subcommand};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "vireo")]
#[command(about = "Vireo runtime toolchain", long_about = None)]
#[command(version)]
struct Cli {
    /// Color output: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the out-of-process JIT compilation server
    JitServer {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:9536")]
        addr: String,
    },

    /// Inspect recorded event logs
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Print every entry in a recorded log
    Dump {
        /// Log file to read
        file: String,
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a recorded log's integrity
    Verify {
        /// Log file to read
        file: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let choice = output::resolve_color_choice(Some(cli.color.as_str()));
    let mut out = output::StyledOutput::new(choice);

    match cli.command {
        Commands::JitServer { addr } => commands::jit_server::serve(&addr),
        Commands::Log { command } => match command {
            LogCommands::Dump { file, json } => commands::log::dump(&file, json, &mut out),
            LogCommands::Verify { file } => commands::log::verify(&file, &mut out),
        },
    }
}
