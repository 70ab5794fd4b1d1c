//! Paginated iteration over a key range.
//!
//! The iterator lists keys in batches of `prefetch` with key-range requests
//! and reads each key with a get. After a batch, the next request starts
//! from the last key of the batch, exclusive. When the last key of a batch
//! is the end key there is nothing left to list, so no further request is
//! made.

use crate::client::Client;
use crate::entry::{Entry, KeyRange};
use crate::error::ClientError;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeState {
    /// The next step lists another batch of keys.
    NeedsPrefetch,
    /// Keys from the current batch remain.
    Iterating,
    Exhausted,
}

/// A lazy, forward-only cursor over the entries in a key range.
pub struct RangeIter<'a> {
    client: &'a Client,
    /// Bounds of the next key-range request.
    range: KeyRange,
    prefetch: u32,
    batch: VecDeque<Vec<u8>>,
    state: RangeState,
    queries: usize,
}

impl<'a> RangeIter<'a> {
    pub(crate) fn new(client: &'a Client, range: KeyRange, prefetch: u32) -> Self {
        Self {
            client,
            range,
            prefetch,
            batch: VecDeque::new(),
            state: RangeState::NeedsPrefetch,
            queries: 0,
        }
    }

    /// Number of key-range requests issued so far.
    pub fn queries(&self) -> usize {
        self.queries
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == RangeState::Exhausted
    }

    /// Returns the next entry, or `None` once the range is exhausted.
    ///
    /// Keys removed between listing and reading are skipped. After an error
    /// the iterator is exhausted.
    pub async fn next(&mut self) -> Result<Option<Entry>, ClientError> {
        match self.advance().await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                self.state = RangeState::Exhausted;
                self.batch.clear();
                Err(e)
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<Entry>, ClientError> {
        loop {
            match self.state {
                RangeState::Exhausted => return Ok(None),
                RangeState::NeedsPrefetch => self.prefetch().await?,
                RangeState::Iterating => {
                    let Some(key) = self.batch.pop_front() else {
                        self.state = RangeState::NeedsPrefetch;
                        continue;
                    };
                    if self.batch.is_empty() {
                        self.state = if key == self.range.end_key {
                            RangeState::Exhausted
                        } else {
                            RangeState::NeedsPrefetch
                        };
                    }
                    match self.client.get(key).await? {
                        Some(entry) => return Ok(Some(entry)),
                        None => continue,
                    }
                }
            }
        }
    }

    async fn prefetch(&mut self) -> Result<(), ClientError> {
        let keys = self
            .client
            .get_key_range(self.range.clone(), self.prefetch, false)
            .await?;
        self.queries += 1;
        tracing::debug!(keys = keys.len(), queries = self.queries, "listed key batch");

        match keys.last() {
            None => self.state = RangeState::Exhausted,
            Some(last) => {
                self.range.start_key = last.clone();
                self.range.start_inclusive = false;
                self.batch = keys.into();
                self.state = RangeState::Iterating;
            }
        }
        Ok(())
    }

    /// Reads the remaining entries into a vector.
    pub async fn collect(mut self) -> Result<Vec<Entry>, ClientError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
