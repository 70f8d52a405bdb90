mod engine;
mod ranking;
mod searchable;

pub use engine::SearchEngine;
pub use ranking::{PLUGIN_ENTRY_BONUS, RankedHit, RankingParams, rank};
pub use searchable::{SearchMatch, Searchable, SearchableSource};
