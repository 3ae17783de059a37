use std::fmt;

use crate::scanning::types::SearchKey;

/// A private, deterministic sequence of search keys for one epoch.
///
/// Implementations come from the crypto collaborator. The cursor only ever
/// moves forward, and `clone_box` snapshots it without sharing mutation.
pub trait Keystream: Send + Sync {
    /// Length in bytes of every output.
    fn output_size(&self) -> usize;

    /// Number of outputs consumed so far.
    fn index(&self) -> u64;

    /// Current output. Does not advance.
    fn peek(&self) -> SearchKey;

    /// Returns the current output, then advances.
    fn advance(&mut self) -> SearchKey;

    fn clone_box(&self) -> Box<dyn Keystream>;

    /// Previews the next `count` outputs on a private copy.
    ///
    /// Used to plan a search; the real cursor is untouched.
    fn outputs(&self, count: usize) -> Vec<SearchKey> {
        let mut preview = self.clone_box();
        (0..count).map(|_| preview.advance()).collect()
    }
}

impl Clone for Box<dyn Keystream> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn Keystream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystream")
            .field("index", &self.index())
            .field("output_size", &self.output_size())
            .finish()
    }
}
