use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Which kind of network surface the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// HTTP polling API plus push websockets. Clients pick their own ports.
    Http,

    /// Bridge one configured port to raw TCP peers.
    Tcp,

    /// Bridge one configured port to UDP datagram peers.
    Udp,

    /// Loop one configured port back onto itself. No network surface.
    Echo,
}

/// The command line interface for serial bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Socket port number to listen on
    #[arg(short, long, default_value_t = 5147)]
    pub port: u16,

    /// Server mode
    #[arg(short, long, value_enum, default_value_t = Mode::Http)]
    pub mode: Mode,

    /// URL prefix the HTTP API is mounted under
    #[arg(long, default_value = "/api/v1")]
    pub prefix: String,

    /// Disable serial port listing
    #[arg(long)]
    pub no_list: bool,

    /// Disable read operations
    #[arg(long)]
    pub no_read: bool,

    /// Disable write operations
    #[arg(long)]
    pub no_write: bool,

    /// Disable push websockets
    #[arg(long)]
    pub no_ws: bool,

    /// Restrict access to these serial ports, e.g. `ttyUSB0,COM1`
    #[arg(long, value_delimiter = ',')]
    pub allow_ports: Vec<String>,

    /// The port to bridge in tcp/udp/echo modes: NAME[,BAUD[,FRAME]],
    /// e.g. `ttyUSB0,115200,8N1`
    #[arg(short, long)]
    pub line: Option<String>,

    /// Path to a configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// List the host's serial ports and exit.
    List,

    /// Show an example of a configuration file's contents.
    ConfigExample,
}
