//! Typed read-model queries over the projected tables.
//!
//! Conventions shared by every module: tombstoned rows (`state =
//! 'removed'`) are excluded unless explicitly requested, lookups return
//! `None` instead of failing, searches paginate with
//! [`crate::types::Pagination`] capped at 1000 rows, and every query is
//! scoped to one instance.

pub mod apps;
pub mod filter;
pub mod grants;
pub mod members;
pub mod orgs;
pub mod projects;
pub mod users;

pub use apps::AppQueries;
pub use filter::{CompiledFilter, Filter, FilterValue, Op};
pub use grants::UserGrantQueries;
pub use members::MemberQueries;
pub use orgs::OrgQueries;
pub use projects::ProjectQueries;
pub use users::UserQueries;
