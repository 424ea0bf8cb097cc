pub mod cli;
pub mod command;
pub mod crypt;
pub mod error;
pub mod fields;
pub mod protocol;
pub mod record;
pub mod session;

pub use command::{Command, CommandError};
pub use crypt::encrypt_challenge;
pub use error::DndError;
pub use fields::{Field, FieldRegistry, Permission};
pub use record::{Record, RecordBatch};
pub use session::{CredentialMode, Responder, Session, SessionConfig, SessionState};
