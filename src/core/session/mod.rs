// Session module - Connection lifecycle, leases and command transactions
pub mod file_push;
pub mod lease;
pub mod session;
pub mod state;
pub mod writer;

pub use file_push::FilePush;
pub use lease::{LeaseBook, LeaseEvent, LeaseHolder, LeaseStats};
pub use session::{ExecOutput, Session, SessionEvent, SessionSnapshot};
pub use state::{SessionState, SessionStatistics};
pub use writer::WriterGate;
