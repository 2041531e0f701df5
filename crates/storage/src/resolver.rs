//! Pointer resolution
//!
//! An index stores [`Pointer`]s. Before it can compare keys it has to turn a
//! pointer into a record [`Location`]: directly, when the index stores
//! Locations, or through an [`AliasList`](crate::AliasList) when it stores
//! AliasRefs.

use burrow_core::{Location, Pointer, Result};

/// Maps a stored pointer to the record it designates
pub trait Resolver<P: Pointer>: Send + Sync {
    /// The record Location, or `None` if the pointer no longer designates one
    fn resolve(&self, pointer: P) -> Result<Option<Location>>;
}

/// Identity resolver for indexes that store raw Locations
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl Resolver<Location> for Direct {
    fn resolve(&self, pointer: Location) -> Result<Option<Location>> {
        Ok(Some(pointer))
    }
}
