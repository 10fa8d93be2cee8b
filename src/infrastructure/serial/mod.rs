// Serial module - Serial port transport and port discovery
pub mod client;
pub mod ports;

pub use client::SerialTransport;
pub use ports::{list_ports, PortSummary};
