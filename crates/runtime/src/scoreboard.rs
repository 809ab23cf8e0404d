// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-sample completion table.

use crate::RuntimeError;

/// Completion state of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    NotCopied,
    Copied,
}

/// Tracks which samples of the current batch have their outputs in place.
///
/// A batch is complete exactly when every entry is [`Entry::Copied`].
#[derive(Debug, Clone)]
pub struct Scoreboard {
    entries: Vec<Entry>,
    copied: usize,
}

impl Scoreboard {
    pub fn new(batch_size: usize) -> Self {
        Self {
            entries: vec![Entry::NotCopied; batch_size],
            copied: 0,
        }
    }

    /// Marks every entry NotCopied.
    pub fn reset(&mut self) {
        self.entries.fill(Entry::NotCopied);
        self.copied = 0;
    }

    /// Records that the output of `sample` has been copied out.
    pub fn mark_copied(&mut self, sample: usize) -> Result<(), RuntimeError> {
        let len = self.entries.len();
        let entry = self.entries.get_mut(sample).ok_or_else(|| {
            RuntimeError::Scoreboard(format!("sample {sample} outside batch of {len}"))
        })?;
        if *entry == Entry::Copied {
            return Err(RuntimeError::Scoreboard(format!(
                "sample {sample} copied twice"
            )));
        }
        *entry = Entry::Copied;
        self.copied += 1;
        Ok(())
    }

    /// Marks a whole range copied, as a joined shard does.
    pub fn mark_range(&mut self, samples: std::ops::Range<usize>) -> Result<(), RuntimeError> {
        samples.into_iter().try_for_each(|s| self.mark_copied(s))
    }

    pub fn entry(&self, sample: usize) -> Option<Entry> {
        self.entries.get(sample).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn copied_count(&self) -> usize {
        self.copied
    }

    pub fn outstanding(&self) -> usize {
        self.entries.len() - self.copied
    }

    pub fn is_complete(&self) -> bool {
        self.copied == self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_after_all_copied() {
        let mut sb = Scoreboard::new(3);
        assert!(!sb.is_complete());
        sb.mark_copied(2).unwrap();
        sb.mark_copied(0).unwrap();
        assert_eq!(sb.outstanding(), 1);
        assert_eq!(sb.entry(1), Some(Entry::NotCopied));
        sb.mark_copied(1).unwrap();
        assert!(sb.is_complete());
        assert_eq!(sb.copied_count(), 3);
    }

    #[test]
    fn test_double_copy_rejected() {
        let mut sb = Scoreboard::new(2);
        sb.mark_copied(1).unwrap();
        assert!(sb.mark_copied(1).is_err());
        assert_eq!(sb.copied_count(), 1);
    }

    #[test]
    fn test_out_of_range() {
        let mut sb = Scoreboard::new(2);
        assert!(sb.mark_copied(2).is_err());
    }

    #[test]
    fn test_mark_range_and_reset() {
        let mut sb = Scoreboard::new(4);
        sb.mark_range(2..4).unwrap();
        assert_eq!(sb.copied_count(), 2);
        sb.reset();
        assert_eq!(sb.copied_count(), 0);
        assert_eq!(sb.entry(3), Some(Entry::NotCopied));
    }
}
