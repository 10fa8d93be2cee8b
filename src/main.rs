// ReplCom - Serial REPL client for MicroPython boards
use clap::Parser;
use replcom::cli::{execute_command, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    execute_command(args).await?;
    Ok(())
}
