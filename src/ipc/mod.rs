//! Trust authority boundary.
//!
//! Verification requests and verdicts cross the process boundary as
//! MessagePack payloads in length-prefixed frames over a Unix socket.
//!
//! Note: the link and server require Unix domain sockets and are only
//! available on Unix platforms.

#[cfg(unix)]
mod client;
mod error;
mod message;
#[cfg(unix)]
mod server;

#[cfg(unix)]
pub use client::{relay, AuthorityLink};
pub use error::{IpcError, IpcResult};
pub use message::{
    decode_frame_length, encode_frame, read_frame, write_frame, VerdictCode, VerdictMessage,
    VerifyRequestMessage, FRAME_HEADER_SIZE, MAX_MESSAGE_SIZE,
};
#[cfg(unix)]
pub use server::{AuthorityServer, ShutdownHandle, VerdictHandler};
