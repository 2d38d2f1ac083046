//! Settlement quantity and balance movement.
//!
//! ## Trade Quantity
//!
//! Given both parties' balances and fee rates, [`trade_quantity`] finds the
//! largest quantity (up to what matching offered) neither party can fail to
//! pay for. Fees are charged in the quote token:
//!
//! ```text
//! quote     = q * price / decimals
//! fee(rate) = quote * rate / base_fee
//!
//! taker buys:  taker pays quote + taker_fee (quote)   maker pays q (base)
//! taker sells: taker pays q (base)                    maker pays quote + maker_fee (quote)
//! ```
//!
//! When the quote-paying side is short, its affordable quantity is
//! `balance * decimals * base_fee / (base_fee + rate) / price`. When the
//! base-paying side is short, its balance is the quantity. The two taker
//! sides therefore round differently; validators depend on this exact
//! arithmetic.
//!
//! `reject_maker` tells the caller which party was the binding constraint.
//! A zero quantity means that party is rejected outright.

use primitive_types::{H160, U256};
use tracing::debug;

use crate::accounts::AccountState;
use crate::error::{BookError, Result};
use crate::types::{Order, Side};

/// Denominator of relayer fee rates
pub const BASE_FEE: u64 = 10_000;

/// Everything [`trade_quantity`] needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeInputs {
    pub taker_side: Side,
    pub taker_fee_rate: U256,
    pub taker_balance: U256,
    pub maker_price: U256,
    pub maker_fee_rate: U256,
    pub maker_balance: U256,

    /// 10^decimals of the base token
    pub base_decimals: U256,

    /// Quantity offered by the matching loop
    pub quantity: U256,
    pub base_fee: U256,
}

/// Result of [`trade_quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeQuantity {
    pub quantity: U256,
    pub reject_maker: bool,
}

impl TradeQuantity {
    fn new(quantity: U256, reject_maker: bool) -> Self {
        Self {
            quantity,
            reject_maker,
        }
    }
}

fn mul(a: U256, b: U256) -> Result<U256> {
    a.checked_mul(b).ok_or(BookError::Overflow("settlement multiply"))
}

fn div(a: U256, b: U256) -> Result<U256> {
    a.checked_div(b).ok_or(BookError::Overflow("settlement divide by zero"))
}

/// `q * price / decimals`
pub fn quote_quantity(quantity: U256, price: U256, base_decimals: U256) -> Result<U256> {
    div(mul(quantity, price)?, base_decimals)
}

/// `quote * rate / base_fee`
pub fn fee(quote: U256, rate: U256, base_fee: U256) -> Result<U256> {
    div(mul(quote, rate)?, base_fee)
}

/// Quantity a quote-paying party can afford including its fee.
fn affordable(balance: U256, rate: U256, inputs: &TradeInputs) -> Result<U256> {
    let scaled = mul(mul(balance, inputs.base_decimals)?, inputs.base_fee)?;
    let denominator = inputs
        .base_fee
        .checked_add(rate)
        .ok_or(BookError::Overflow("settlement fee rate"))?;
    div(div(scaled, denominator)?, inputs.maker_price)
}

/// Largest tradable quantity and which party, if any, must be rejected.
pub fn trade_quantity(inputs: &TradeInputs) -> Result<TradeQuantity> {
    if inputs.maker_price.is_zero() {
        return Err(BookError::InvalidOrder("maker price is zero".into()));
    }
    let q = inputs.quantity;
    let quote = quote_quantity(q, inputs.maker_price, inputs.base_decimals)?;

    match inputs.taker_side {
        Side::Buy => {
            let taker_fee = fee(quote, inputs.taker_fee_rate, inputs.base_fee)?;
            let taker_out = quote.saturating_add(taker_fee);
            let maker_out = q;
            let taker_ok = inputs.taker_balance >= taker_out;
            let maker_ok = inputs.maker_balance >= maker_out;

            match (taker_ok, maker_ok) {
                (true, true) => Ok(TradeQuantity::new(q, false)),
                (false, true) => {
                    let capped = affordable(inputs.taker_balance, inputs.taker_fee_rate, inputs)?;
                    if capped.is_zero() {
                        debug!(balance = %inputs.taker_balance, need = %taker_out, "taker cannot pay");
                    }
                    Ok(TradeQuantity::new(capped, false))
                }
                (true, false) => {
                    debug!(balance = %inputs.maker_balance, need = %maker_out, "maker cannot pay");
                    Ok(TradeQuantity::new(inputs.maker_balance, true))
                }
                (false, false) => {
                    let capped = affordable(inputs.taker_balance, inputs.taker_fee_rate, inputs)?;
                    if capped <= inputs.maker_balance {
                        Ok(TradeQuantity::new(capped, false))
                    } else {
                        Ok(TradeQuantity::new(inputs.maker_balance, true))
                    }
                }
            }
        }
        Side::Sell => {
            let maker_fee = fee(quote, inputs.maker_fee_rate, inputs.base_fee)?;
            let taker_out = q;
            let maker_out = quote.saturating_add(maker_fee);
            let taker_ok = inputs.taker_balance >= taker_out;
            let maker_ok = inputs.maker_balance >= maker_out;

            match (taker_ok, maker_ok) {
                (true, true) => Ok(TradeQuantity::new(q, false)),
                (false, true) => {
                    debug!(balance = %inputs.taker_balance, need = %taker_out, "taker cannot pay");
                    Ok(TradeQuantity::new(inputs.taker_balance, false))
                }
                (true, false) => {
                    let capped = affordable(inputs.maker_balance, inputs.maker_fee_rate, inputs)?;
                    Ok(TradeQuantity::new(capped, true))
                }
                (false, false) => {
                    let capped = affordable(inputs.maker_balance, inputs.maker_fee_rate, inputs)?;
                    if capped <= inputs.taker_balance {
                        Ok(TradeQuantity::new(capped, true))
                    } else {
                        Ok(TradeQuantity::new(inputs.taker_balance, false))
                    }
                }
            }
        }
    }
}

/// Amounts moved by one settled fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Settlement {
    pub quantity: U256,
    pub quote: U256,
    pub taker_fee: U256,
    pub maker_fee: U256,
}

/// Move base, quote and fees for a fill of `quantity` between `taker` and
/// resting `maker`. Fees go to each side's relayer owner.
pub fn settle_balances<A: AccountState>(
    accounts: &mut A,
    taker: &Order,
    maker: &Order,
    quantity: U256,
    inputs: &TradeInputs,
) -> Result<Settlement> {
    let quote = quote_quantity(quantity, maker.price, inputs.base_decimals)?;
    let taker_fee = fee(quote, inputs.taker_fee_rate, inputs.base_fee)?;
    let maker_fee = fee(quote, inputs.maker_fee_rate, inputs.base_fee)?;
    let (base_token, quote_token) = (maker.base_token, maker.quote_token);

    let (buyer, seller, buyer_fee, seller_fee) = match taker.side {
        Side::Buy => (taker.user, maker.user, taker_fee, maker_fee),
        Side::Sell => (maker.user, taker.user, maker_fee, taker_fee),
    };

    let buyer_pays = quote
        .checked_add(buyer_fee)
        .ok_or(BookError::Overflow("settlement quote"))?;
    let seller_gets = quote.saturating_sub(seller_fee);

    accounts.sub_balance(buyer, quote_token, buyer_pays)?;
    accounts.add_balance(buyer, base_token, quantity)?;
    accounts.sub_balance(seller, base_token, quantity)?;
    accounts.add_balance(seller, quote_token, seller_gets)?;

    credit_fee(accounts, taker.exchange, quote_token, taker_fee)?;
    credit_fee(accounts, maker.exchange, quote_token, maker_fee)?;

    Ok(Settlement {
        quantity,
        quote,
        taker_fee,
        maker_fee,
    })
}

fn credit_fee<A: AccountState>(accounts: &mut A, exchange: H160, token: H160, amount: U256) -> Result<()> {
    if amount.is_zero() {
        return Ok(());
    }
    let owner = accounts.relayer_owner(exchange);
    accounts.add_balance(owner, token, amount)
}

// ============================================================================
// Unit Tests
// ============================================================================
