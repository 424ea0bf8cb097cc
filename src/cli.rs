//! CLI utilities for the DND client.
//!
//! The utilities present in this module drive an interactive session: read a
//! command, run it against a [`Session`], print the outcome.
use std::io::{BufRead, Read, Write};

use crate::{
    command::{Command, CommandError},
    record::RecordBatch,
    session::{CredentialMode, Session},
};

/// Prompt user for a command.
///
/// End of input is treated as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    Command::try_from(s.as_str())
}

/// Prompt user for a password. The input is echoed; this is a plain line read.
pub fn prompt_password<R, W>(mut reader: R, mut writer: W) -> Result<String, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "password: ")?;
    writer.flush()?;

    reader.read_line(&mut s)?;
    Ok(s.trim_end_matches(['\r', '\n']).to_string())
}

/// Runs one command against `session` and writes the result to `writer`.
///
/// `reader` is only consulted for the password of a `validate` command.
pub fn execute<T, R, W>(
    session: &Session<T>,
    command: Command,
    mode: CredentialMode,
    reader: R,
    mut writer: W,
) -> Result<(), CommandError>
where
    T: Read + Write,
    R: BufRead,
    W: Write,
{
    match command {
        Command::Exit => session.close()?,
        Command::Noop => {
            session.keep_alive()?;
            writeln!(writer, "ok")?;
        }
        Command::Unprivilege => {
            session.unprivilege()?;
            writeln!(writer, "privileges dropped")?;
        }
        Command::Fields => {
            let registry = session.fetch_fields()?;
            for field in registry.iter() {
                writeln!(
                    writer,
                    "{:<20} read: {:<8} write: {}",
                    field.name, field.read, field.write
                )?;
            }
        }
        Command::Readable(class) => {
            let registry = session.fetch_fields()?;
            for field in registry.readable_by(class) {
                writeln!(writer, "{}", field.name)?;
            }
        }
        Command::Writable(class) => {
            let registry = session.fetch_fields()?;
            for field in registry.writable_by(class) {
                writeln!(writer, "{}", field.name)?;
            }
        }
        Command::Count(subject) => {
            let count = session.lookup_count(&subject)?;
            writeln!(writer, "{count}")?;
        }
        Command::Lookup { subject, fields } => {
            let batch = session.lookup(&subject, &borrowed(&fields))?;
            print_batch(&mut writer, &batch)?;
        }
        Command::Unique { subject, fields } => {
            let batch = session.lookup_unique(&subject, &borrowed(&fields))?;
            if batch.is_empty() {
                writeln!(writer, "no unique match for '{subject}'")?;
            }
            print_batch(&mut writer, &batch)?;
        }
        Command::Validate { subject, fields } => {
            let responder = session.begin_validate(&subject, &borrowed(&fields))?;
            let password = prompt_password(reader, &mut writer)?;
            let batch = responder.respond(&password, mode)?;
            writeln!(writer, "validated '{subject}'")?;
            print_batch(&mut writer, &batch)?;
        }
    }
    Ok(())
}

fn borrowed(fields: &[String]) -> Vec<&str> {
    fields.iter().map(String::as_str).collect()
}

fn print_batch<W: Write>(writer: &mut W, batch: &RecordBatch) -> Result<(), CommandError> {
    for (i, record) in batch.iter().enumerate() {
        if i > 0 {
            writeln!(writer)?;
        }
        for (name, value) in record.iter() {
            writeln!(writer, "{name}: {value}")?;
        }
    }

    if batch.truncated {
        writeln!(writer, "(more matching records were not returned)")?;
    }
    Ok(())
}
