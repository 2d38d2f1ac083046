//! Settlement-aware matching over the versioned state.
//!
//! ## Flow
//!
//! ```text
//! apply_order:
//!   nonce check          -> NonceTooLow / NonceTooHigh, nonce untouched
//!   validation           -> reject, nonce advanced
//!   snapshot state + accounts
//!   issue id (book nonce + 1)
//!   while quantity > 0 and best opposing price acceptable:
//!     relayer fee checks  -> cancel maker / reject taker
//!     trade_quantity      -> zero: cancel maker or reject taker
//!     settle balances, reduce maker, record trade
//!     clamped below offer -> cancel maker or reject taker remainder
//!   limit remainder rests, market remainder is dropped
//!   any error             -> revert state + accounts, propagate
//! ```
//!
//! Rejects are values in [`Execution::rejects`], never errors. Only
//! consistency and store failures surface as `Err`.

use primitive_types::{H160, H256, U256};
use tracing::{debug, info, warn};

use crate::accounts::AccountState;
use crate::error::{BookError, Result};
use crate::orderbook::book_key;
use crate::settlement::{self, settle_balances, trade_quantity, TradeInputs, TradeQuantity, BASE_FEE};
use crate::state::VersionedStore;
use crate::store::KeyValueStore;
use crate::types::units::decimal_scale;
use crate::types::{ExecutionReceipt, Order, OrderStatus, Reject, RejectReason, Side, Trade};

/// Processor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Denominator of relayer fee rates
    pub base_fee: U256,

    /// Flat fee charged against each relayer's deposit per trade
    pub relayer_fee: U256,

    /// Fills allowed for one incoming order, 0 for no limit
    pub max_trades_per_order: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            base_fee: U256::from(BASE_FEE),
            relayer_fee: U256::zero(),
            max_trades_per_order: 0,
        }
    }
}

/// Outcome of one order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// Id issued to the order, 0 if rejected before matching
    pub order_id: u64,
    pub trades: Vec<Trade>,
    pub rejects: Vec<Reject>,
    pub order_in_book: Option<Order>,

    /// Unfilled market quantity, discarded
    pub dropped: U256,
}

impl Execution {
    pub fn filled_quantity(&self) -> U256 {
        self.trades
            .iter()
            .fold(U256::zero(), |acc, trade| acc.saturating_add(trade.quantity))
    }

    /// True if the incoming order itself was rejected
    pub fn is_rejected(&self, order_hash: &H256) -> bool {
        self.rejects.iter().any(|r| r.order_hash == *order_hash)
    }
}

enum Step {
    Continue,
    Stop,
}

/// Applies orders to a [`VersionedStore`] with balance settlement.
#[derive(Debug, Default, Clone)]
pub struct OrderProcessor {
    config: ProcessorConfig,
    orders_processed: u64,
    trades_executed: u64,
    orders_rejected: u64,
}

impl OrderProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn orders_processed(&self) -> u64 {
        self.orders_processed
    }

    pub fn trades_executed(&self) -> u64 {
        self.trades_executed
    }

    pub fn orders_rejected(&self) -> u64 {
        self.orders_rejected
    }

    fn reject(&mut self, execution: &mut Execution, order: &Order, reason: RejectReason) {
        debug!(user = ?order.user, nonce = order.nonce, %reason, "order rejected");
        self.orders_rejected += 1;
        execution.rejects.push(Reject::new(order, reason));
    }

    /// Static checks that need no book state.
    fn validate<A: AccountState>(&self, order: &Order, accounts: &A) -> Result<Option<RejectReason>> {
        if order.quantity.is_zero() {
            return Ok(Some(RejectReason::InvalidQuantity));
        }
        if !order.is_market() && order.price.is_zero() {
            return Ok(Some(RejectReason::InvalidPrice));
        }
        if order.base_token == order.quote_token {
            return Ok(Some(RejectReason::InvalidPair));
        }
        if !accounts.check_relayer_fee(order.exchange, self.config.relayer_fee) {
            return Ok(Some(RejectReason::InsufficientRelayerFee));
        }
        if !order.is_market() && !self.can_pay(order, accounts)? {
            return Ok(Some(RejectReason::InsufficientBalance));
        }
        Ok(None)
    }

    /// Whether the user holds enough to pay for the whole limit order.
    fn can_pay<A: AccountState>(&self, order: &Order, accounts: &A) -> Result<bool> {
        match order.side {
            Side::Buy => {
                let decimals = base_decimals(accounts, order.base_token)?;
                let quote = settlement::quote_quantity(order.quantity, order.price, decimals)?;
                let rate = accounts.relayer_fee_rate(order.exchange);
                let fee = settlement::fee(quote, rate, self.config.base_fee)?;
                let need = quote.checked_add(fee).ok_or(BookError::Overflow("order cost"))?;
                Ok(accounts.balance(order.user, order.quote_token) >= need)
            }
            Side::Sell => Ok(accounts.balance(order.user, order.base_token) >= order.quantity),
        }
    }

    /// Apply one order. On `Err` both the state and the accounts are back
    /// where they were before the call.
    pub fn apply_order<S, A>(
        &mut self,
        state: &mut VersionedStore<Order, S>,
        accounts: &mut A,
        mut order: Order,
        timestamp: u64,
    ) -> Result<Execution>
    where
        S: KeyValueStore,
        A: AccountState,
    {
        let mut execution = Execution::default();
        let expected = accounts.nonce(order.user);
        if order.nonce < expected {
            self.reject(&mut execution, &order, RejectReason::NonceTooLow);
            return Ok(execution);
        }
        if order.nonce > expected {
            self.reject(&mut execution, &order, RejectReason::NonceTooHigh);
            return Ok(execution);
        }
        if let Some(reason) = self.validate(&order, accounts)? {
            self.reject(&mut execution, &order, reason);
            accounts.set_nonce(order.user, order.nonce + 1);
            return Ok(execution);
        }

        let state_revision = state.snapshot();
        let account_revision = accounts.snapshot();
        match self.execute(state, accounts, &mut order, timestamp, &mut execution) {
            Ok(()) => {
                accounts.set_nonce(order.user, order.nonce + 1);
                self.orders_processed += 1;
                self.trades_executed += execution.trades.len() as u64;
                debug!(
                    order_id = order.id,
                    trades = execution.trades.len(),
                    rejects = execution.rejects.len(),
                    resting = execution.order_in_book.is_some(),
                    "order applied"
                );
                Ok(execution)
            }
            Err(err) => {
                warn!(error = %err, fatal = err.is_fatal(), "order failed, reverting");
                // Both sides are rolled back even if one of them fails
                let state_reverted = state.revert_to_snapshot(state_revision);
                let accounts_reverted = accounts.revert_to_snapshot(account_revision);
                state_reverted?;
                accounts_reverted?;
                Err(err)
            }
        }
    }

    fn execute<S, A>(
        &mut self,
        state: &mut VersionedStore<Order, S>,
        accounts: &mut A,
        order: &mut Order,
        timestamp: u64,
        execution: &mut Execution,
    ) -> Result<()>
    where
        S: KeyValueStore,
        A: AccountState,
    {
        let book = book_key(order.base_token, order.quote_token);
        let id = state
            .nonce(book)?
            .checked_add(1)
            .ok_or(BookError::Overflow("order id"))?;
        state.set_nonce(book, id)?;
        order.id = id;
        order.created_at = timestamp;
        order.updated_at = timestamp;
        execution.order_id = id;

        let opposing = order.side.opposite();
        let decimals = base_decimals(accounts, order.base_token)?;
        let mut taker_rejected = false;

        while !order.quantity.is_zero() {
            let limit = self.config.max_trades_per_order;
            if limit > 0 && execution.trades.len() >= limit {
                break;
            }
            let price = match state.best_price(book, opposing)? {
                Some(price) if order.is_market() || order.side.accepts(order.price, price) => price,
                _ => break,
            };
            let maker = state
                .best_order(book, opposing)?
                .ok_or(BookError::EmptyHeadOrder { price, length: 0 })?;

            match self.match_maker(state, accounts, book, order, &maker, decimals, timestamp, execution)? {
                Step::Continue => {}
                Step::Stop => {
                    taker_rejected = true;
                    break;
                }
            }
        }

        if order.quantity.is_zero() || taker_rejected {
            return Ok(());
        }
        if order.is_market() {
            debug!(order_id = order.id, dropped = %order.quantity, "market order remainder dropped");
            execution.dropped = order.quantity;
            return Ok(());
        }

        order.status = if execution.trades.is_empty() {
            OrderStatus::Open
        } else {
            OrderStatus::PartialFilled
        };
        state.insert_order(book, order.clone())?;
        execution.order_in_book = Some(order.clone());
        Ok(())
    }

    /// Trade the taker against one maker.
    #[allow(clippy::too_many_arguments)]
    fn match_maker<S, A>(
        &mut self,
        state: &mut VersionedStore<Order, S>,
        accounts: &mut A,
        book: H256,
        order: &mut Order,
        maker: &Order,
        decimals: U256,
        timestamp: u64,
        execution: &mut Execution,
    ) -> Result<Step>
    where
        S: KeyValueStore,
        A: AccountState,
    {
        let relayer_fee = self.config.relayer_fee;
        if !accounts.check_relayer_fee(maker.exchange, relayer_fee) {
            state.cancel_order(book, maker.id)?;
            self.reject(execution, maker, RejectReason::InsufficientRelayerFee);
            return Ok(Step::Continue);
        }
        let taker_need = if maker.exchange == order.exchange {
            relayer_fee.saturating_mul(U256::from(2u64))
        } else {
            relayer_fee
        };
        if !accounts.check_relayer_fee(order.exchange, taker_need) {
            self.reject(execution, order, RejectReason::InsufficientRelayerFee);
            return Ok(Step::Stop);
        }

        let offered = order.quantity.min(maker.quantity);
        let inputs = self.trade_inputs(accounts, order, maker, offered, decimals);
        let TradeQuantity {
            quantity,
            reject_maker,
        } = trade_quantity(&inputs)?;

        if quantity.is_zero() {
            if reject_maker {
                state.cancel_order(book, maker.id)?;
                self.reject(execution, maker, RejectReason::MakerInsufficientBalance);
                return Ok(Step::Continue);
            }
            self.reject(execution, order, RejectReason::InsufficientBalance);
            return Ok(Step::Stop);
        }

        settle_balances(accounts, order, maker, quantity, &inputs)?;
        state.sub_amount(book, maker.id, quantity)?;
        state.set_last_price(book, maker.price)?;
        order.fill(quantity);
        order.updated_at = timestamp;
        execution.trades.push(Trade::between(order, maker, quantity, timestamp));
        self.charge_relayers(accounts, order.exchange, maker.exchange)?;

        if quantity < offered {
            if reject_maker {
                state.cancel_order(book, maker.id)?;
                self.reject(execution, maker, RejectReason::MakerInsufficientBalance);
            } else {
                self.reject(execution, order, RejectReason::InsufficientBalance);
                return Ok(Step::Stop);
            }
        }
        Ok(Step::Continue)
    }

    fn trade_inputs<A: AccountState>(
        &self,
        accounts: &A,
        taker: &Order,
        maker: &Order,
        quantity: U256,
        base_decimals: U256,
    ) -> TradeInputs {
        let (taker_balance, maker_balance) = match taker.side {
            Side::Buy => (
                accounts.balance(taker.user, taker.quote_token),
                accounts.balance(maker.user, maker.base_token),
            ),
            Side::Sell => (
                accounts.balance(taker.user, taker.base_token),
                accounts.balance(maker.user, maker.quote_token),
            ),
        };
        TradeInputs {
            taker_side: taker.side,
            taker_fee_rate: accounts.relayer_fee_rate(taker.exchange),
            taker_balance,
            maker_price: maker.price,
            maker_fee_rate: accounts.relayer_fee_rate(maker.exchange),
            maker_balance,
            base_decimals,
            quantity,
            base_fee: self.config.base_fee,
        }
    }

    fn charge_relayers<A: AccountState>(&self, accounts: &mut A, taker: H160, maker: H160) -> Result<()> {
        let fee = self.config.relayer_fee;
        if fee.is_zero() {
            return Ok(());
        }
        accounts.sub_relayer_fee(taker, fee)?;
        accounts.sub_relayer_fee(maker, fee)
    }

    /// Apply a batch and summarize it. Stops at the first error; earlier
    /// orders of the batch stay applied.
    pub fn apply_batch<S, A>(
        &mut self,
        state: &mut VersionedStore<Order, S>,
        accounts: &mut A,
        orders: Vec<Order>,
        batch_id: u64,
        timestamp: u64,
    ) -> Result<(Vec<Execution>, ExecutionReceipt)>
    where
        S: KeyValueStore,
        A: AccountState,
    {
        let mut executions = Vec::with_capacity(orders.len());
        for order in orders {
            executions.push(self.apply_order(state, accounts, order, timestamp)?);
        }
        let trades = executions.iter().map(|e| e.trades.len() as u64).sum();
        let rejected = executions
            .iter()
            .flat_map(|e| e.rejects.iter())
            .count() as u64;
        let receipt = ExecutionReceipt::new(
            batch_id,
            executions.len() as u64,
            trades,
            rejected,
            state.intermediate_root()?,
            timestamp,
        );
        info!(
            batch_id,
            orders = receipt.orders_processed,
            trades = receipt.trades_executed,
            rejected = receipt.orders_rejected,
            root = %receipt.state_root_hex(),
            "batch applied"
        );
        Ok((executions, receipt))
    }
}

fn base_decimals<A: AccountState>(accounts: &A, token: H160) -> Result<U256> {
    decimal_scale(accounts.token_decimals(token)).ok_or(BookError::Overflow("token decimals"))
}

// ============================================================================
// Unit Tests
// ============================================================================
