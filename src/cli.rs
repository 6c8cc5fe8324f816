use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "toolgate", version, about = "Compliance gate engine for agent host tool-call hooks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run as a lifecycle hook: read one event from stdin, print a verdict
    Hook,

    /// Print the persisted state record for a session
    State {
        /// Host session identifier
        #[arg(long)]
        session: String,
    },
}
