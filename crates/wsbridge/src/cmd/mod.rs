use std::net::SocketAddr;

use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept WebSocket connections and bridge each one to a new process.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to accept connections on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,
    /// Send binary messages and read stdout in raw chunks instead of lines.
    #[arg(long)]
    pub binary: bool,
    /// Frame stdout with an 8-byte size header and prefix inbound messages
    /// with a 4-byte length.
    #[arg(long)]
    pub size_header: bool,
    /// Reject size-header frames declaring this many bytes or more.
    #[arg(long, value_name = "BYTES", default_value_t = wsbridge::frame::DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame: usize,
    /// Extra milliseconds granted at each shutdown step before escalating.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub closems: u64,
    /// Command to launch per connection.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
