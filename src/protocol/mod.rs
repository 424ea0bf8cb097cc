//! DND wire protocol.
//!
//! This module defines the line-oriented protocol spoken between a DND client and
//! server: the command vocabulary, the numbered reply lines, and the framer that
//! moves both over a byte stream.
//!
//! # Overview
//!
//! A session starts with the server's `220` greeting. The client then sends one
//! command per line (`VERB argument\n`) and reads the reply before sending the
//! next command; there are no request identifiers, so replies correlate with
//! commands purely by position.
//!
//! Every reply line is a three digit code, a space, and free text:
//!
//! - `1xx` lines open or continue a batch (`101 <records> <fields>`,
//!   `102 <count>`, then `110`/`120` data lines).
//! - `2xx` lines end a command successfully; `201` also says the server
//!   withheld further matches.
//! - `300` carries a validation challenge that must be answered by the very
//!   next command (`PASS` or `PASE`).
//! - `5xx` lines report a failure that leaves the connection usable.
//!
//! # Key Components
//!
//! - [`Request`]: a command line, both for writing (client) and parsing (server).
//! - [`Reply`]: one parsed reply line with its [`code`].
//! - [`ProtocolTransport`]: the line framer over any `Read + Write` stream.
//! - [`PseudoServer`]: an in-process server with canned data, used to exercise
//!   the client end to end.
//!
//! # See Also
//!
//! - [`session`](crate::session): the client state machine built on top of this layer.
mod request;
mod response;
mod server;
mod thread;
mod transport;

pub use request::Request;
pub use response::{Reply, ReplyClass, code};
pub use server::{Directory, Exchange, PseudoServer, Transcript};
pub use transport::{ProtocolTransport, TransportError};
