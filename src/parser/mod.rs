pub mod blocks;
pub mod classify;
pub mod consolidate;
pub mod dedup;
pub mod markup;
pub mod properties;
pub mod segments;
pub mod walker;
