//! Lending items: borrow and invest offers.
//!
//! A lending book is ordered by interest rate instead of price. Borrowers
//! sit on the bid side (they bid for funds at up to a rate), investors on
//! the ask side (they offer funds at no less than a rate). Everything else
//! about the book, journal and revert behaves as for spot orders.

use primitive_types::{H160, H256, U256};
use ssz_rs::prelude::*;

use crate::codec::{self, h160_to_word, u256_to_word, word_to_h160, word_to_u256, Word};
use crate::error::CodecError;
use crate::types::{OrderStatus, Side};

/// Lending side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LendingSide {
    #[default]
    Borrow,
    Invest,
}

impl LendingSide {
    pub fn to_u8(self) -> u8 {
        match self {
            LendingSide::Borrow => 0,
            LendingSide::Invest => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LendingSide::Borrow),
            1 => Some(LendingSide::Invest),
            _ => None,
        }
    }

    /// Book side the item rests on
    pub fn book_side(self) -> Side {
        match self {
            LendingSide::Borrow => Side::Buy,
            LendingSide::Invest => Side::Sell,
        }
    }
}

/// A borrow or invest offer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LendingItem {
    pub id: u64,
    pub side: LendingSide,
    pub status: OrderStatus,

    /// Interest rate, the ordering key
    pub interest: U256,
    pub quantity: U256,

    /// Loan term in seconds
    pub term: u64,
    pub lending_token: H160,
    pub collateral_token: H160,
    pub user: H160,
    pub relayer: H160,
    pub nonce: u64,
    pub created_at: u64,
    pub hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct LendingRecord {
    pub id: u64,
    pub side_raw: u8,
    pub status_raw: u8,
    pub interest: Word,
    pub quantity: Word,
    pub term: u64,
    pub lending_token: Word,
    pub collateral_token: Word,
    pub user: Word,
    pub relayer: Word,
    pub nonce: u64,
    pub created_at: u64,
    pub hash: Word,
}

impl LendingItem {
    pub fn new(side: LendingSide, interest: U256, quantity: U256, term: u64) -> Self {
        let mut item = Self {
            side,
            interest,
            quantity,
            term,
            ..Self::default()
        };
        item.hash = item.compute_hash();
        item
    }

    pub fn with_user(mut self, user: H160, nonce: u64) -> Self {
        self.user = user;
        self.nonce = nonce;
        self.hash = self.compute_hash();
        self
    }

    pub fn with_tokens(mut self, lending_token: H160, collateral_token: H160) -> Self {
        self.lending_token = lending_token;
        self.collateral_token = collateral_token;
        self.hash = self.compute_hash();
        self
    }

    /// Hash over the offer terms; id and status are excluded
    pub fn compute_hash(&self) -> H256 {
        let mut record = self.to_record();
        record.id = 0;
        record.status_raw = 0;
        record.hash = [0u8; 32];
        codec::content_hash(&record, "lending signature").unwrap_or_default()
    }

    pub fn to_record(&self) -> LendingRecord {
        LendingRecord {
            id: self.id,
            side_raw: self.side.to_u8(),
            status_raw: self.status.to_u8(),
            interest: u256_to_word(self.interest),
            quantity: u256_to_word(self.quantity),
            term: self.term,
            lending_token: h160_to_word(self.lending_token),
            collateral_token: h160_to_word(self.collateral_token),
            user: h160_to_word(self.user),
            relayer: h160_to_word(self.relayer),
            nonce: self.nonce,
            created_at: self.created_at,
            hash: self.hash.0,
        }
    }

    pub fn from_record(record: &LendingRecord) -> Result<Self, CodecError> {
        let side = LendingSide::from_u8(record.side_raw).ok_or(CodecError::InvalidTag {
            kind: "lending side",
            tag: record.side_raw,
        })?;
        let status = OrderStatus::from_u8(record.status_raw).ok_or(CodecError::InvalidTag {
            kind: "lending status",
            tag: record.status_raw,
        })?;
        Ok(Self {
            id: record.id,
            side,
            status,
            interest: word_to_u256(&record.interest),
            quantity: word_to_u256(&record.quantity),
            term: record.term,
            lending_token: word_to_h160(&record.lending_token),
            collateral_token: word_to_h160(&record.collateral_token),
            user: word_to_h160(&record.user),
            relayer: word_to_h160(&record.relayer),
            nonce: record.nonce,
            created_at: record.created_at,
            hash: H256(record.hash),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&self.to_record(), "lending item")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let record: LendingRecord = codec::decode(bytes, "lending item")?;
        Self::from_record(&record)
    }
}
