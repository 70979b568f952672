//! Integration tests for the Weft conflict resolution engine

mod archive_packages;
mod cache_invalidation;
mod merge_formats;
mod resolution_flow;
mod test_utils;
