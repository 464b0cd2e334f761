use crate::constants::TABLE_MAX_PAGES;

/// Settings for an open database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbConfig {
    /// Upper bound on the number of pages the pager will hold. Every page
    /// stays cached for the whole session, so this also bounds memory.
    pub max_pages: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            max_pages: TABLE_MAX_PAGES,
        }
    }
}

impl DbConfig {
    pub fn with_max_pages(max_pages: usize) -> Self {
        DbConfig { max_pages }
    }
}
