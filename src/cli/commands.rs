use crate::cli::args::{Args, Command, ConfigCommand, ConnectionArgs, DataFormat};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::communication::Transport;
use crate::core::session::{Session, SessionEvent};
use crate::domain::config::{ReplComConfig, SerialSettings};
use crate::domain::error::{ReplComError, ReplComResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::{effective_level, init_logging};
use crate::infrastructure::mock::MockDevice;
use crate::infrastructure::serial::{list_ports, SerialTransport};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> ReplComResult<()> {
    let writer = ConsoleWriter::new(args.output);

    let config_manager = ConfigManager::new()?;
    let config = match &args.config {
        Some(config_path) => config_manager.load_config_from_path(config_path.as_ref())?,
        None => config_manager.load_config()?,
    };

    init_logging(&effective_level(
        &config.global.log_level,
        args.verbose,
        args.quiet,
    ))?;

    match args.command {
        Command::Ports => {
            writer.write_ports(&list_ports()?)?;
            Ok(())
        }
        Command::Repl(connection) => {
            let (session, events) = open_session(&connection, &config).await?;
            writer.write_message("Connected. Ctrl-C interrupts the board, Ctrl-D exits.")?;
            run_repl(&session, events).await
        }
        Command::Run { file, connection } => {
            let code = std::fs::read_to_string(&file)?;
            let (session, _events) = open_session(&connection, &config).await?;
            let result = session.exec(&code).await;
            session.disconnect().await?;

            let result = result?;
            writer.write_exec(&result)?;
            if result.is_success() {
                Ok(())
            } else {
                Err(ReplComError::Device(format!(
                    "{} raised an exception",
                    file.display()
                )))
            }
        }
        Command::Put {
            local,
            remote,
            connection,
        } => {
            let remote = match remote {
                Some(remote) => remote,
                None => remote_name(&local)?,
            };
            let content = std::fs::read_to_string(&local)?;
            let (session, _events) = open_session(&connection, &config).await?;
            let result = session.write_file(&remote, &content).await;
            session.disconnect().await?;

            result?;
            writer.write_message(&format!(
                "Wrote {} bytes to '{}'",
                content.len(),
                remote
            ))?;
            Ok(())
        }
        Command::Get {
            remote,
            local,
            connection,
        } => {
            let (session, _events) = open_session(&connection, &config).await?;
            let result = session.read_file(&remote).await;
            session.disconnect().await?;

            let content = result?;
            match local {
                Some(local) => {
                    std::fs::write(&local, &content)?;
                    writer.write_message(&format!(
                        "Read {} bytes into '{}'",
                        content.len(),
                        local.display()
                    ))?;
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(content.as_bytes()).await?;
                    stdout.flush().await?;
                }
            }
            Ok(())
        }
        Command::Ls { path, connection } => {
            let (session, _events) = open_session(&connection, &config).await?;
            let result = session.list_files(&path).await;
            session.disconnect().await?;

            writer.write_entries(&result?)?;
            Ok(())
        }
        Command::Send {
            data,
            format,
            connection,
        } => {
            let bytes = parse_data(&data, format)?;
            let (session, _events) = open_session(&connection, &config).await?;
            let result = session.send_bytes(&bytes).await;
            session.disconnect().await?;

            result?;
            writer.write_message(&format!("Sent {} bytes", bytes.len()))?;
            Ok(())
        }
        Command::Interrupt(connection) => {
            let (session, _events) = open_session(&connection, &config).await?;
            let result = session.interrupt().await;
            session.disconnect().await?;

            result?;
            writer.write_message("Interrupt sent")?;
            Ok(())
        }
        Command::Config(config_args) => {
            execute_config_command(config_args.command, &writer, &config, &config_manager)
        }
        Command::Demo => run_demo(&writer, &config).await,
    }
}

fn execute_config_command(
    command: ConfigCommand,
    writer: &ConsoleWriter,
    config: &ReplComConfig,
    config_manager: &ConfigManager,
) -> ReplComResult<()> {
    match command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
        ConfigCommand::Init { dir, global } => {
            if global {
                let global_path = config_manager.global_config_path();
                if global_path.exists() {
                    return Err(ReplComError::Config {
                        message: format!("{} already exists", global_path.display()),
                    });
                }
                config_manager.save_global_config(&ReplComConfig::default())?;
                writer.write_message(&format!(
                    "Global configuration initialized at '{}'",
                    global_path.display()
                ))?;
            } else {
                let dir = match dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                let path = config_manager.init_project_config(&dir)?;
                writer.write_message(&format!(
                    "Project configuration initialized at '{}'",
                    path.display()
                ))?;
            }
            Ok(())
        }
        ConfigCommand::Devices => {
            writer.write_devices(&config.devices)?;
            Ok(())
        }
    }
}

/// Work out the link settings from the command line and configured devices.
pub fn resolve_settings(
    connection: &ConnectionArgs,
    config: &ReplComConfig,
) -> ReplComResult<SerialSettings> {
    let mut settings = match (&connection.device, &connection.port) {
        (Some(name), _) => config
            .find_device(name)
            .map(|device| device.serial.clone())
            .ok_or_else(|| ReplComError::Config {
                message: format!("Device '{}' is not configured", name),
            })?,
        (None, Some(port)) => SerialSettings::new(port.clone(), config.global.default_baud_rate),
        (None, None) => {
            return Err(ReplComError::InvalidInput(
                "no device given; use --port or --device".to_string(),
            ))
        }
    };

    if let Some(port) = &connection.port {
        settings.port = port.clone();
    }
    if let Some(baud) = connection.baud {
        settings.baud_rate = baud;
    }
    if let Some(data_bits) = connection.data_bits {
        settings.data_bits = data_bits;
    }
    if let Some(stop_bits) = connection.stop_bits {
        settings.stop_bits = stop_bits;
    }
    if let Some(parity) = connection.parity {
        settings.parity = parity.into();
    }
    if let Some(flow_control) = connection.flow_control {
        settings.flow_control = flow_control.into();
    }
    Ok(settings)
}

async fn open_session(
    connection: &ConnectionArgs,
    config: &ReplComConfig,
) -> ReplComResult<(Session, mpsc::UnboundedReceiver<SessionEvent>)> {
    let settings = resolve_settings(connection, config)?;
    connect_with(Arc::new(SerialTransport::new()), &settings, config).await
}

async fn connect_with(
    transport: Arc<dyn Transport>,
    settings: &SerialSettings,
    config: &ReplComConfig,
) -> ReplComResult<(Session, mpsc::UnboundedReceiver<SessionEvent>)> {
    let (session, events) = Session::new(transport, config.global.session_options());
    session.connect(settings).await?;
    debug!("Session {} ready on {}", session.id(), settings.port);
    Ok((session, events))
}

fn remote_name(local: &Path) -> ReplComResult<String> {
    local
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ReplComError::InvalidInput(format!("cannot derive a device name from {}", local.display()))
        })
}

/// Forward stdin lines to the device and device output to stdout.
async fn run_repl(
    session: &Session,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> ReplComResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Output(text)) => {
                    stdout.write_all(text.as_bytes()).await?;
                    stdout.flush().await?;
                }
                Some(SessionEvent::Error(message)) => warn!("{}", message),
                Some(SessionEvent::Disconnected { reason }) => {
                    return match reason {
                        Some(reason) => Err(ReplComError::transport(reason)),
                        None => Ok(()),
                    };
                }
                Some(SessionEvent::StateChanged(state)) => debug!("Session state: {}", state),
                None => return Ok(()),
            },
            line = lines.next_line() => match line? {
                Some(line) => session.send_raw(&format!("{}\r", line)).await?,
                None => return session.disconnect().await,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                session.interrupt().await?;
            }
        }
    }
}

/// Simulated board used by `demo`.
fn demo_device() -> MockDevice {
    MockDevice::raw_repl(|program: &str| {
        if program.contains("os.listdir") {
            ("boot.py\r\nmain.py\r\n".to_string(), String::new())
        } else if program.starts_with("f = open(") {
            (String::new(), String::new())
        } else if program.contains("1/0") {
            (
                String::new(),
                "Traceback (most recent call last):\r\n  File \"<stdin>\", line 1, in <module>\r\nZeroDivisionError: divide by zero\r\n"
                    .to_string(),
            )
        } else {
            (format!("ran {} bytes\r\n", program.len()), String::new())
        }
    })
}

async fn run_demo(writer: &ConsoleWriter, config: &ReplComConfig) -> ReplComResult<()> {
    let device = demo_device();
    let settings = SerialSettings::new("mock0", config.global.default_baud_rate);
    let (session, _events) = connect_with(device.transport(), &settings, config).await?;

    writer.write_message("$ exec print('hello')")?;
    writer.write_exec(&session.exec("print('hello')").await?)?;

    writer.write_message("$ exec 1/0")?;
    writer.write_exec(&session.exec("1/0").await?)?;

    writer.write_message("$ put main.py")?;
    session.write_file("main.py", "print('hello')\n").await?;

    writer.write_message("$ ls /")?;
    writer.write_entries(&session.list_files("/").await?)?;

    let snapshot = session.snapshot().await;
    session.disconnect().await?;
    writer.write_snapshot(&snapshot)?;
    Ok(())
}

/// Decode command line data in the given format.
pub fn parse_data(data: &str, format: DataFormat) -> ReplComResult<Vec<u8>> {
    match format {
        DataFormat::Text => Ok(data.as_bytes().to_vec()),
        DataFormat::Hex => {
            let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
            hex::decode(&cleaned)
                .map_err(|e| ReplComError::InvalidInput(format!("Invalid hex data: {}", e)))
        }
        DataFormat::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| ReplComError::InvalidInput(format!("Invalid base64 data: {}", e)))
        }
    }
}
