//! Repository Module
//!
//! SQLite-backed storage for roles, users, menus and API records

pub mod apis;
pub mod menus;
pub mod roles;
pub mod users;

pub use apis::ApiRepository;
pub use menus::MenuRepository;
pub use roles::RoleRepository;
pub use users::UserRepository;

/// `?1, ?2, ...` for an `IN (...)` clause with `n` parameters.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// `(LIMIT, OFFSET)` of a 1-based page. The size is clamped to `1..=MAX_PAGE_SIZE`.
pub(crate) fn page_window(page_num: Option<u32>, page_size: Option<u32>) -> (i64, i64) {
    let size = i64::from(page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE));
    let num = i64::from(page_num.unwrap_or(1).max(1));
    (size, (num - 1).saturating_mul(size))
}
