//! Resumable SHA-256.
//!
//! [`StreamHasher`] keeps its compression state in plain fields so that a
//! partially hashed download can be persisted and continued later.

use sha2::{
    compress256,
    digest::generic_array::{GenericArray, typenum::U64},
};

const BLOCK_SIZE: usize = 64;

const INITIAL_STATE: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab,
    0x5be0cd19,
];

/// Incremental SHA-256 whose state can be serialized.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamHasher {
    state: [u32; 8],
    pending: Vec<u8>,
    length: u64,
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHasher {
    pub fn new() -> Self {
        Self {
            state: INITIAL_STATE,
            pending: Vec::with_capacity(BLOCK_SIZE),
            length: 0,
        }
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Checks that the buffered bytes agree with the hashed length.
    /// A deserialized hasher must pass this before it is updated.
    pub fn is_consistent(&self) -> bool {
        self.pending.len() < BLOCK_SIZE
            && self.pending.len() as u64 == self.length % BLOCK_SIZE as u64
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.length = self.length.wrapping_add(data.len() as u64);

        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() < BLOCK_SIZE {
                return;
            }

            compress(&mut self.state, &self.pending);
            self.pending.clear();
        }

        let full = data.len() - data.len() % BLOCK_SIZE;
        compress(&mut self.state, &data[..full]);
        self.pending.extend_from_slice(&data[full..]);
    }

    /// Applies the length padding and returns the digest.
    /// The hasher itself is left untouched so it can keep being updated.
    pub fn finish(&self) -> [u8; 32] {
        let mut state = self.state;
        let mut tail = self.pending.clone();
        tail.push(0x80);

        while tail.len() % BLOCK_SIZE != BLOCK_SIZE - 8 {
            tail.push(0);
        }

        tail.extend_from_slice(&self.length.wrapping_mul(8).to_be_bytes());
        compress(&mut state, &tail);

        let mut digest = [0; 32];

        for (chunk, word) in digest.chunks_exact_mut(4).zip(state) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }

        digest
    }
}

fn compress(state: &mut [u32; 8], data: &[u8]) {
    for block in data.chunks_exact(BLOCK_SIZE) {
        let block: &GenericArray<u8, U64> = GenericArray::from_slice(block);
        compress256(state, std::slice::from_ref(block));
    }
}
