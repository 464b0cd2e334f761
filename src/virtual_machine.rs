use thiserror::Error;
use tracing::debug;

use crate::row::{Row, RowError};
use crate::table::{Table, TableError};

#[derive(Debug, PartialEq, Eq)]
pub enum Statement {
    Insert { row: Row },
    Select,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatementError {
    #[error("Syntax error. Could not parse statement .")]
    Sql,
    #[error("Unrecognized keyword at start of '{0}' .")]
    Unrecognized(String),
    #[error("String is too long.")]
    TooLong,
    #[error("ID must be positive.")]
    InvalidId,
}

pub struct VirtualMachine<'a> {
    pub table: &'a mut Table,
}

#[derive(Debug, Error)]
pub enum VMErr {
    #[error("Error: Duplicate key.")]
    DuplicateKey,
    #[error("Error: Table full.")]
    TableFull,
    #[error(transparent)]
    Table(TableError),
}

impl From<TableError> for VMErr {
    fn from(e: TableError) -> Self {
        match e {
            TableError::DuplicateKey(_) => VMErr::DuplicateKey,
            TableError::TableFull => VMErr::TableFull,
            e => VMErr::Table(e),
        }
    }
}

impl VMErr {
    /// Whether the session can carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, VMErr::Table(_))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum VMResult {
    Rows(Vec<Row>),
    Success,
}

pub fn prepare_statement(original_input: &str) -> Result<Statement, StatementError> {
    let mut parts = original_input.split_whitespace();
    match parts.next() {
        Some("insert") => {
            let fields: Vec<&str> = parts.collect();
            match fields.as_slice() {
                [id, username, email] => prepare_insert(id, username, email),
                _ => Err(StatementError::Sql),
            }
        }
        Some("select") => match parts.next() {
            None => Ok(Statement::Select),
            Some(_) => Err(StatementError::Sql),
        },
        _ => Err(StatementError::Unrecognized(original_input.to_string())),
    }
}

fn prepare_insert(id: &str, username: &str, email: &str) -> Result<Statement, StatementError> {
    let id: i32 = id.parse().map_err(|_| StatementError::Sql)?;
    if id <= 0 {
        return Err(StatementError::InvalidId);
    }

    let row = Row::new(id as u32, username, email).map_err(|e| match e {
        RowError::StringTooLong => StatementError::TooLong,
        RowError::InvalidText { .. } | RowError::EmbeddedNul { .. } => StatementError::Sql,
    })?;
    Ok(Statement::Insert { row })
}

impl VirtualMachine<'_> {
    pub fn execute_statement(&mut self, statement: Statement) -> Result<VMResult, VMErr> {
        match statement {
            Statement::Insert { row } => {
                debug!(id = row.id(), "executing insert");
                self.table.insert(&row)?;
                Ok(VMResult::Success)
            }
            Statement::Select => {
                let mut rows = Vec::new();
                let mut cursor = self.table.start()?;

                while !cursor.end_of_table {
                    rows.push(cursor.value()?);
                    cursor.advance()?;
                }

                debug!(rows = rows.len(), "executed select");
                Ok(VMResult::Rows(rows))
            }
        }
    }
}
