use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments for ReplCom
#[derive(Parser, Debug)]
#[command(
    name = "replcom",
    version = env!("CARGO_PKG_VERSION"),
    about = "Talk to MicroPython boards over a serial REPL",
    long_about = "Interactive passthrough, raw-mode code execution and file transfer for boards running a MicroPython-style REPL over a serial port."
)]
pub struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial ports
    Ports,
    /// Forward the terminal to the device until end of input
    Repl(ConnectionArgs),
    /// Execute a local script on the device
    Run {
        /// Script to execute
        file: PathBuf,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Copy a local file to the device
    Put {
        /// Local file
        local: PathBuf,
        /// Name on the device (defaults to the local file name)
        remote: Option<String>,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Copy a file from the device
    Get {
        /// Name on the device
        remote: String,
        /// Local destination (defaults to stdout)
        local: Option<PathBuf>,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// List a directory on the device
    Ls {
        /// Directory on the device
        #[arg(default_value = "/")]
        path: String,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Send raw data to the device
    Send {
        /// Data to send
        data: String,
        /// Data format (text, hex, base64)
        #[arg(short, long, value_enum, default_value = "text")]
        format: DataFormat,
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Interrupt the program running on the device
    Interrupt(ConnectionArgs),
    /// Configuration management commands
    Config(ConfigArgs),
    /// Run a short session against a simulated board
    Demo,
}

/// Which device to talk to and how
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Serial port path
    #[arg(short, long)]
    pub port: Option<String>,

    /// Device name from the configuration
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Data bits
    #[arg(long)]
    pub data_bits: Option<u8>,

    /// Stop bits
    #[arg(long)]
    pub stop_bits: Option<u8>,

    /// Parity (none, even, odd)
    #[arg(long, value_enum)]
    pub parity: Option<ParityArg>,

    /// Flow control (none, software, hardware)
    #[arg(long, value_enum)]
    pub flow_control: Option<FlowControlArg>,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Create default configuration
    Init {
        /// Directory to create the project configuration in
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Write the global configuration instead
        #[arg(short, long)]
        global: bool,
    },
    /// List device configurations
    Devices,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
    /// CSV output
    Csv,
}

/// Parity configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ParityArg {
    None,
    Even,
    Odd,
}

/// Flow control configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FlowControlArg {
    None,
    Software,
    Hardware,
}

/// Data format argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Text,
    Hex,
    Base64,
}

impl From<ParityArg> for crate::domain::config::ParityConfig {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Self::None,
            ParityArg::Even => Self::Even,
            ParityArg::Odd => Self::Odd,
        }
    }
}

impl From<FlowControlArg> for crate::domain::config::FlowControlConfig {
    fn from(flow_control: FlowControlArg) -> Self {
        match flow_control {
            FlowControlArg::None => Self::None,
            FlowControlArg::Software => Self::Software,
            FlowControlArg::Hardware => Self::Hardware,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFormat::Text => write!(f, "text"),
            DataFormat::Hex => write!(f, "hex"),
            DataFormat::Base64 => write!(f, "base64"),
        }
    }
}
