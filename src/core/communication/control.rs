//! Control bytes and markers understood by the device's interactive interpreter.

/// Enter raw-execute mode (Ctrl-A)
pub const ENTER_RAW: u8 = 0x01;
/// Return to the friendly interactive mode (Ctrl-B)
pub const EXIT_RAW: u8 = 0x02;
/// Interrupt the running program (Ctrl-C)
pub const INTERRUPT: u8 = 0x03;
/// Execute the buffered raw input, also terminates each raw output section (Ctrl-D)
pub const EXECUTE: u8 = 0x04;

/// Acknowledgement the device prints once raw input has been accepted.
pub const RAW_ACK: &str = "OK";
/// End of one raw-mode output section.
pub const END_OF_SECTION: &str = "\u{4}";

/// Literal text that terminates a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Read until the stream ends or the scan is cancelled.
    None,
    Text(String),
}

impl Marker {
    pub fn text(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        if marker.is_empty() {
            Marker::None
        } else {
            Marker::Text(marker)
        }
    }

    pub fn raw_ack() -> Self {
        Self::text(RAW_ACK)
    }

    pub fn end_of_section() -> Self {
        Self::text(END_OF_SECTION)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Marker::None => None,
            Marker::Text(text) => Some(text),
        }
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Marker::None => write!(f, "<none>"),
            Marker::Text(text) => write!(f, "{:?}", text),
        }
    }
}

/// Builder for the byte sequence a transaction writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlSequence {
    bytes: Vec<u8>,
}

impl ControlSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop whatever is running: carriage return then two interrupts.
    pub fn interrupt(mut self) -> Self {
        self.bytes.extend_from_slice(&[b'\r', INTERRUPT, INTERRUPT]);
        self
    }

    pub fn enter_raw(mut self) -> Self {
        self.bytes.push(ENTER_RAW);
        self
    }

    pub fn payload(mut self, text: &str) -> Self {
        self.bytes.extend_from_slice(text.as_bytes());
        self
    }

    pub fn execute(mut self) -> Self {
        self.bytes.push(EXECUTE);
        self
    }

    pub fn exit_raw(mut self) -> Self {
        self.bytes.push(EXIT_RAW);
        self
    }

    /// Full raw-mode round trip for `code`.
    pub fn raw_exec(code: &str, interrupt_first: bool) -> Self {
        let sequence = if interrupt_first {
            Self::new().interrupt()
        } else {
            Self::new()
        };
        sequence.enter_raw().payload(code).execute().exit_raw()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
