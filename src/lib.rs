//! Weft: Deterministic Conflict Resolution for Content Packages
//!
//! When multiple content packages ("mods") contribute files at the same
//! virtual path, Weft detects the genuinely conflicting paths and produces a
//! single merged artifact per path, exposed through a synthetic overlay
//! directory. Merges are format-aware (tagged-record documents, hierarchical
//! key-value documents, line/block-oriented scripts) and heuristic but
//! deterministic: documented tie-break rules, same inputs, same bytes.

pub mod cli;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod host;
pub mod logging;
pub mod manifest;
pub mod merge;
pub mod store;
pub mod types;
