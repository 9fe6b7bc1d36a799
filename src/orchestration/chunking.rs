//! # Chunking
//!
//! Partitions a batch into ordered, fixed-size chunks. Every chunk except possibly the
//! last holds exactly `chunk_size` items, and concatenating the chunks reproduces the
//! input order.

use crate::error::{Result, TaskerBatchError};
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Position of the chunk in dispatch order
    pub index: usize,
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split `items` into chunks of `chunk_size`; a zero chunk size is a validation error
pub fn chunk<T: Clone>(items: &[T], chunk_size: usize) -> Result<Vec<Chunk<T>>> {
    let chunk_size = NonZeroUsize::new(chunk_size)
        .ok_or_else(|| TaskerBatchError::validation("chunk_size must be greater than 0"))?;
    Ok(partition(items.to_vec(), chunk_size))
}

/// Owning variant used once the chunk size has been validated
pub fn partition<T>(items: Vec<T>, chunk_size: NonZeroUsize) -> Vec<Chunk<T>> {
    let size = chunk_size.get();
    let mut chunks = Vec::with_capacity(chunk_count(items.len(), chunk_size));
    let mut current = Vec::with_capacity(size.min(items.len()));

    for item in items {
        current.push(item);
        if current.len() == size {
            let index = chunks.len();
            chunks.push(Chunk {
                index,
                items: std::mem::take(&mut current),
            });
        }
    }
    if !current.is_empty() {
        let index = chunks.len();
        chunks.push(Chunk {
            index,
            items: current,
        });
    }

    chunks
}

pub fn chunk_count(len: usize, chunk_size: NonZeroUsize) -> usize {
    len.div_ceil(chunk_size.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiple() {
        let chunks = chunk(&[1, 2, 3, 4], 2).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].items, vec![1, 2]);
        assert_eq!(chunks[1].items, vec![3, 4]);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_last_chunk_holds_remainder() {
        let chunks = chunk(&["a", "b", "c", "d", "e"], 2).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_chunk_size_larger_than_batch() {
        let chunks = chunk(&[1, 2, 3], 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].items, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_input_produces_no_chunks() {
        let chunks = chunk::<u8>(&[], 3).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            chunk(&[1, 2], 0),
            Err(TaskerBatchError::ValidationError(_))
        ));
    }
}
