//! Tree node records.
//!
//! ## Design
//!
//! A `TreeNode` is one record in the key-value store. Its links
//! (`parent`, `left`, `right`) are logical keys of other nodes, not
//! pointers. The all-zero key means "no node".
//!
//! ## Record Layout
//!
//! ```text
//! [key: 32][color: 1][parent: 32][left: 32][right: 32]  (SSZ header, 129 bytes)
//! [value: remaining bytes]
//! ```

use primitive_types::H256;
use ssz_rs::prelude::*;

use crate::codec::{self, Word, EMPTY_KEY};
use crate::error::CodecError;

/// Node color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Red,
    Black,
}

impl Color {
    pub fn to_u8(self) -> u8 {
        match self {
            Color::Red => 0,
            Color::Black => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Color::Red),
            1 => Some(Color::Black),
            _ => None,
        }
    }
}

/// Fixed-size part of a node record
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
struct NodeHeader {
    key: Word,
    color: u8,
    parent: Word,
    left: Word,
    right: Word,
}

/// Encoded size of [`NodeHeader`]
pub const HEADER_LEN: usize = 32 + 1 + 32 + 32 + 32;

/// Red-black tree node as stored in the key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Logical key (big-endian, compared bytewise)
    pub key: H256,

    /// Opaque payload
    pub value: Vec<u8>,

    pub color: Color,

    /// Parent node key, zero for the root
    pub parent: H256,

    /// Left child key, zero if none
    pub left: H256,

    /// Right child key, zero if none
    pub right: H256,
}

impl TreeNode {
    /// Create a new red, unlinked node
    pub fn new(key: H256, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            color: Color::Red,
            parent: EMPTY_KEY,
            left: EMPTY_KEY,
            right: EMPTY_KEY,
        }
    }

    /// Check if this node has no parent and no children
    #[inline]
    pub fn is_unlinked(&self) -> bool {
        self.parent.is_zero() && self.left.is_zero() && self.right.is_zero()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.left.is_zero() && self.right.is_zero()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let header = NodeHeader {
            key: self.key.0,
            color: self.color.to_u8(),
            parent: self.parent.0,
            left: self.left.0,
            right: self.right.0,
        };
        let mut bytes = codec::encode(&header, "tree node")?;
        bytes.extend_from_slice(&self.value);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let header: NodeHeader = codec::decode(&bytes[..HEADER_LEN], "tree node")?;
        let color = Color::from_u8(header.color).ok_or(CodecError::InvalidTag {
            kind: "node color",
            tag: header.color,
        })?;
        Ok(Self {
            key: H256(header.key),
            value: bytes[HEADER_LEN..].to_vec(),
            color,
            parent: H256(header.parent),
            left: H256(header.left),
            right: H256(header.right),
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
