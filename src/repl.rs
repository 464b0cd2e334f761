use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::config::DbConfig;
use crate::constants::layout_constants;
use crate::table::{Table, TableError};
use crate::virtual_machine::{
    prepare_statement, StatementError, VMErr, VMResult, VirtualMachine,
};

#[derive(Debug, PartialEq, Eq)]
pub enum MetaCommand {
    Exit,
    Constants,
    BTree,
    Unsupported,
}

pub enum ReplAction<'a> {
    Meta {
        command: MetaCommand,
        original_input: &'a str,
    },
    Statement {
        original_input: &'a str,
    },
}

/// Errors that end the session.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error(transparent)]
    Table(#[from] TableError),
}

/// What one input line produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplOutput {
    pub lines: Vec<String>,
    pub exit: bool,
}

impl ReplOutput {
    fn lines(lines: Vec<String>) -> Self {
        ReplOutput { lines, exit: false }
    }

    fn line<S: Into<String>>(line: S) -> Self {
        Self::lines(vec![line.into()])
    }
}

pub struct Repl {
    table: Table,
}

impl Repl {
    pub fn new(table: Table) -> Self {
        Repl { table }
    }

    pub fn open<P>(filename: P, config: DbConfig) -> Result<Self, ReplError>
    where
        P: AsRef<Path>,
    {
        Ok(Repl::new(Table::open_with_config(filename, config)?))
    }

    /// Runs one input line. Local errors come back as a single output line;
    /// an `Err` means the session cannot continue.
    pub fn execute(&mut self, input: &str) -> Result<ReplOutput, ReplError> {
        match input.into() {
            ReplAction::Meta {
                command,
                original_input,
            } => self.do_meta_command(command, original_input),
            ReplAction::Statement { original_input } => self.run_statement(original_input),
        }
    }

    /// Runs one raw input line. Input that is not utf-8 cannot be a statement,
    /// so it is reported as a syntax error and the session goes on.
    pub fn execute_bytes(&mut self, input: &[u8]) -> Result<ReplOutput, ReplError> {
        match std::str::from_utf8(input) {
            Ok(input) => self.execute(input),
            Err(e) => {
                debug!(error = %e, "input is not utf-8");
                Ok(ReplOutput::line(StatementError::Sql.to_string()))
            }
        }
    }

    /// Flushes the table and releases the database file.
    pub fn close(self) -> Result<(), ReplError> {
        Ok(self.table.close()?)
    }

    fn do_meta_command(
        &mut self,
        command: MetaCommand,
        original_input: &str,
    ) -> Result<ReplOutput, ReplError> {
        debug!(?command, "meta command");
        match command {
            MetaCommand::Exit => Ok(ReplOutput {
                lines: Vec::new(),
                exit: true,
            }),
            MetaCommand::Constants => {
                let mut lines = vec!["Constants:".to_string()];
                lines.extend(
                    layout_constants()
                        .iter()
                        .map(|(name, value)| format!("{}: {}", name, value)),
                );
                Ok(ReplOutput::lines(lines))
            }
            MetaCommand::BTree => {
                let mut lines = vec!["Tree:".to_string()];
                for line in self.table.dump() {
                    lines.push(line?);
                }
                Ok(ReplOutput::lines(lines))
            }
            MetaCommand::Unsupported => Ok(ReplOutput::line(format!(
                "Unrecognized command '{}'",
                original_input
            ))),
        }
    }

    fn run_statement(&mut self, original_input: &str) -> Result<ReplOutput, ReplError> {
        let statement = match prepare_statement(original_input) {
            Ok(statement) => statement,
            Err(e) => return Ok(ReplOutput::line(e.to_string())),
        };

        let mut vm = VirtualMachine {
            table: &mut self.table,
        };
        match vm.execute_statement(statement) {
            Ok(VMResult::Success) => Ok(ReplOutput::line("Executed .")),
            Ok(VMResult::Rows(rows)) => {
                let mut lines: Vec<String> = rows.iter().map(|row| row.to_string()).collect();
                lines.push("Executed .".to_string());
                Ok(ReplOutput::lines(lines))
            }
            Err(VMErr::Table(e)) => Err(e.into()),
            Err(e) => Ok(ReplOutput::line(e.to_string())),
        }
    }
}

impl<'a> From<&'a str> for ReplAction<'a> {
    fn from(s: &'a str) -> Self {
        if s.starts_with('.') {
            ReplAction::Meta {
                command: s.into(),
                original_input: s,
            }
        } else {
            ReplAction::Statement { original_input: s }
        }
    }
}

impl From<&str> for MetaCommand {
    fn from(s: &str) -> Self {
        match s.trim() {
            ".exit" => MetaCommand::Exit,
            ".constants" => MetaCommand::Constants,
            ".btree" => MetaCommand::BTree,
            _ => MetaCommand::Unsupported,
        }
    }
}
