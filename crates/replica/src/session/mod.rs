//! Session establishment and steady-state pumping for both roles.
//!
//! The reliable channel exists for bootstrap only: the init packet
//! (precache lists + initial full snapshot) flows server→client, a 2-byte
//! ack flows back, and from then on everything rides the unreliable channel.
//! Both sessions are pumped cooperatively from the host's thread; nothing
//! here blocks.

mod client;
mod server;

pub use client::{ClientSession, InitPrefixReader};
pub use server::{InitPrefixWriter, ServerEvent, ServerSession};

use std::io;

use thiserror::Error;

use crate::net::channel::StreamError;
use crate::net::codec::CodecError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("reliable stream: {0}")]
    Stream(#[from] StreamError),
    #[error("malformed init packet: {0}")]
    Bootstrap(#[from] CodecError),
}
