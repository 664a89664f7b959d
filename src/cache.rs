//! Per-archive map from entry names to their signers.
//!
//! Thousands of entries in a typical archive are signed by exactly the same set of
//! signers.  Rather than storing a fresh array per entry, every distinct combination
//! is allocated once and shared: entries whose signer sets are equal point at the same
//! [`SignerSet`].
//!
//! Lookup is a linear scan over the distinct combinations seen so far, newest first,
//! since the file currently being merged most likely produced the combination that
//! matches.  Each candidate costs O(k²) for sets of size k.  This is fine as long as
//! the number of combinations stays small, which it does: it is bounded by the number
//! of signature files times their (tiny) signer counts.

use std::{collections::HashMap, sync::Arc};

use crate::signer::CodeSigner;

/// A shared, deduplicated set of signers.  Identity is observable with [`Arc::ptr_eq`].
pub type SignerSet = Arc<[Arc<CodeSigner>]>;

#[derive(Debug, Default)]
pub struct SignerCache {
    /// Every distinct combination allocated so far, oldest first.
    cache: Vec<SignerSet>,
    entries: HashMap<String, SignerSet>,
}

impl SignerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `signers` to the signers of entry `name`.
    ///
    /// The entry ends up with a set equal to the union of what it had and `signers`,
    /// reusing a previously allocated set whenever one is equal.
    pub fn merge(&mut self, signers: &SignerSet, name: &str) {
        let old = self.entries.get(name);

        let set = match self
            .cache
            .iter()
            .rev()
            .find(|cached| matches(cached, old, signers))
        {
            Some(cached) => cached.clone(),
            None => {
                let set = union(old, signers);
                self.cache.push(set.clone());
                set
            }
        };

        self.entries.insert(name.to_owned(), set);
    }

    /// The signers of an entry, or `None` if it is unsigned.
    pub fn get(&self, name: &str) -> Option<&SignerSet> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> &HashMap<String, SignerSet> {
        &self.entries
    }

    /// Number of distinct signer combinations allocated.
    pub fn distinct_sets(&self) -> usize {
        self.cache.len()
    }

    pub fn into_entries(self) -> HashMap<String, SignerSet> {
        self.entries
    }
}

/// Is `cached` exactly `old ∪ new`, as a set?
fn matches(cached: &SignerSet, old: Option<&SignerSet>, new: &SignerSet) -> bool {
    if old.is_none() && Arc::ptr_eq(cached, new) {
        return true;
    }

    let old = old.map(|set| &set[..]).unwrap_or_default();
    old.iter().chain(new.iter()).all(|signer| cached.contains(signer))
        && cached
            .iter()
            .all(|signer| old.contains(signer) || new.contains(signer))
}

/// `old ∪ new`, keeping the order of `old` first.
fn union(old: Option<&SignerSet>, new: &SignerSet) -> SignerSet {
    let mut set: Vec<Arc<CodeSigner>> = old.map(|set| set.to_vec()).unwrap_or_default();
    for signer in new.iter() {
        if !set.contains(signer) {
            set.push(signer.clone());
        }
    }

    // nothing to add: share the caller's set rather than copying it
    if old.is_none() && set.len() == new.len() {
        return new.clone();
    }
    set.into()
}
