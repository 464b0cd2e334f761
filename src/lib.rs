//! A single-table database: a page cache over one file, a B-tree of
//! fixed-width rows keyed by id, and a small `insert`/`select` front end.

pub mod btree;
pub mod config;
pub mod constants;
pub mod pager;
pub mod repl;
pub mod row;
pub mod table;
pub mod virtual_machine;

pub use config::DbConfig;
pub use repl::{Repl, ReplError, ReplOutput};
pub use row::Row;
pub use table::{Table, TableError};
