//! Core data models for the photo catalog.
//!
//! Buckets and stored objects belong to the blob store; catalog records belong
//! to the metadata index. The two sides are linked only by object name.

pub mod bucket;
pub mod catalog;
pub mod object;
