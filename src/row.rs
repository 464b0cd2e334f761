use std::fmt;

use thiserror::Error;

use crate::constants::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("String is too long.")]
    StringTooLong,
    #[error("stored {column} is not valid utf-8")]
    InvalidText { column: &'static str },
    #[error("{column} contains a zero byte")]
    EmbeddedNul { column: &'static str },
}

/// A single record of the table. Text columns are guaranteed to fit their
/// fixed on-disk width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    id: u32,
    username: String,
    email: String,
}

impl Row {
    pub fn new<U, E>(id: u32, username: U, email: E) -> Result<Self, RowError>
    where
        U: Into<String>,
        E: Into<String>,
    {
        let username = username.into();
        let email = email.into();
        if username.len() > COLUMN_USERNAME_SIZE || email.len() > COLUMN_EMAIL_SIZE {
            return Err(RowError::StringTooLong);
        }
        // a zero byte terminates text on disk
        if username.contains('\0') {
            return Err(RowError::EmbeddedNul { column: "username" });
        }
        if email.contains('\0') {
            return Err(RowError::EmbeddedNul { column: "email" });
        }
        Ok(Row {
            id,
            username,
            email,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.username, self.email)
    }
}

pub fn serialize_row(row: &Row) -> [u8; ROW_SIZE] {
    let mut buf = [0u8; ROW_SIZE];

    buf[ID_OFFSET..USERNAME_OFFSET].copy_from_slice(&row.id.to_le_bytes());

    let ubytes = row.username.as_bytes();
    buf[USERNAME_OFFSET..USERNAME_OFFSET + ubytes.len()].copy_from_slice(ubytes);

    let ebytes = row.email.as_bytes();
    buf[EMAIL_OFFSET..EMAIL_OFFSET + ebytes.len()].copy_from_slice(ebytes);

    buf
}

pub fn deserialize_row(buf: &[u8]) -> Result<Row, RowError> {
    let mut ibytes = [0u8; ID_SIZE];
    ibytes.copy_from_slice(&buf[ID_OFFSET..USERNAME_OFFSET]);
    let id = u32::from_le_bytes(ibytes);
    let username = read_text(&buf[USERNAME_OFFSET..EMAIL_OFFSET], "username")?;
    let email = read_text(&buf[EMAIL_OFFSET..ROW_SIZE], "email")?;

    Ok(Row {
        id,
        username,
        email,
    })
}

// Text runs up to the first zero byte; the rest of the column is padding.
fn read_text(column: &[u8], name: &'static str) -> Result<String, RowError> {
    let len = column.iter().position(|b| *b == 0).unwrap_or(column.len());
    String::from_utf8(column[..len].to_vec()).map_err(|_| RowError::InvalidText { column: name })
}
