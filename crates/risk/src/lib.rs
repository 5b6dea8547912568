//! Entry-limit reference data and the pure risk arithmetic shared by every
//! strategy: intrabar range, bracket legs and position size.

pub mod bracket;
pub mod entry_limit;

pub use bracket::{compute_bracket, compute_range_percent, position_size, Bracket};
pub use entry_limit::{EntryLimit, EntryLimitTable};
