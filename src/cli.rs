//! CLI utilities for CowsDB.
//!
//! The utilities present in this module back the `cowsdb_cli` REPL: reading a command
//! from the user and printing result blocks.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::protocol::ResultBlock;

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`, or end of input
    Exit,
    /// Round trip to the server `.ping`
    Ping,
    /// Anything else is sent to the server as SQL
    Query(String),
    /// Blank line
    Empty,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unrecognized command '{0}'")]
    Unrecognized(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Prompt user for a command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CliError>
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

    match s.trim() {
        ".exit" => Ok(Command::Exit),
        ".ping" => Ok(Command::Ping),
        "" => Ok(Command::Empty),
        s if s.starts_with('.') => Err(CliError::Unrecognized(s.to_string())),
        s => Ok(Command::Query(s.to_string())),
    }
}

/// Render a block as tab-separated rows, one line per row, with a header line.
pub fn format_block(block: &ResultBlock) -> String {
    if block.columns.is_empty() {
        return String::new();
    }

    let mut out = block
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join("\t");
    out.push('\n');

    for row in 0..block.rows {
        let values: Vec<String> = block
            .columns
            .iter()
            .map(|c| c.display(row).unwrap_or_default())
            .collect();
        out.push_str(&values.join("\t"));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_queries() {
        let input = b"  SELECT 1 as num  \n";
        let res = prompt(&input[..], Vec::new()).unwrap();
        assert_eq!(Command::Query("SELECT 1 as num".into()), res);
    }

    #[test]
    fn prompt_handles_dot_commands() {
        assert_eq!(prompt(&b".ping\n"[..], Vec::new()).unwrap(), Command::Ping);
        assert_eq!(prompt(&b"\n"[..], Vec::new()).unwrap(), Command::Empty);
        assert_eq!(prompt(&b""[..], Vec::new()).unwrap(), Command::Exit);
    }

    #[test]
    fn prompt_unrecognized_command() {
        let err = prompt(&b".something_wrong\n"[..], Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "unrecognized command '.something_wrong'");
    }

    #[test]
    fn formats_rows_as_tsv() {
        let mut raw = vec![2, 2];
        raw.extend_from_slice(&[4, b'n', b'a', b'm', b'e', 6, b'S', b't', b'r', b'i', b'n', b'g']);
        raw.extend_from_slice(&[1, b'a', 1, b'b']);
        raw.extend_from_slice(&[1, b'n', 4, b'I', b'n', b't', b'8']);
        raw.extend_from_slice(&[1, 0xff]);
        let block = ResultBlock::from_raw(&raw).unwrap();

        assert_eq!(format_block(&block), "name\tn\na\t1\nb\t-1\n");
    }

    #[test]
    fn empty_block_prints_nothing() {
        assert_eq!(format_block(&ResultBlock::empty()), "");
    }
}
