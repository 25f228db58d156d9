//! File system storage management
//!
//! Handles path validation, file operations and directory listings.

pub mod listing;
pub mod operations;
pub mod validation;

// Re-export commonly used validation functions
pub use listing::{DirEntry, EntryKind, ListingFormat, collect_entries, render_listing};
pub use validation::{ResolvedPath, resolve_path, virtual_to_real_path};
