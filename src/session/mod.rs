//! Session lifecycle gating.
//!
//! A session may exchange application data only once it is TRUSTED:
//!
//! ```text
//! HANDSHAKING -> PENDING_VERIFICATION -> TRUSTED | REJECTED -> CLOSED
//! ```
//!
//! Sessions that do not require verification skip PENDING_VERIFICATION.
//! Any state may move to CLOSED.

mod error;
mod gate;
mod state;

pub use error::{SessionError, SessionResult};
pub use gate::{GateEvent, SessionGate};
pub use state::{RejectReason, Session, SessionId, SessionPolicy, SessionState};
