//! ReplCom Library
//!
//! Session management for boards that expose a MicroPython-style REPL over a
//! serial link: interactive passthrough, raw-mode command transactions and
//! line-by-line file transfer, with exclusive leases on each stream direction.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use core::communication::{ControlSequence, Marker, Transport};
pub use core::session::{ExecOutput, Session, SessionEvent, SessionState};
pub use domain::config::{ReplComConfig, SerialSettings, SessionOptions};
pub use domain::error::{ReplComError, ReplComResult};
