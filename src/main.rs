//! Chainbook demo binary.
//!
//! Loads the engine configuration, opens the configured store and replays a
//! small block of orders through the settlement-aware processor, then
//! commits the state, snapshots a store-backed book and prints the results.
//!
//! Usage: `chainbook [config-file]`

use std::process::ExitCode;

use chainbook::accounts::{MemoryAccounts, Relayer};
use chainbook::codec::hash_hex;
use chainbook::config::EngineConfig;
use chainbook::types::units::{from_units, to_units};
use chainbook::{AccountState, Order, OrderBook, OrderProcessor, Side, Snapshot, VersionedStore};
use primitive_types::{H160, U256};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DECIMALS: u32 = 18;

fn units(s: &str) -> U256 {
    to_units(s, DECIMALS).unwrap_or_default()
}

fn run(config: EngineConfig) -> chainbook::Result<()> {
    let mut store = config.open_store()?;
    let base = H160::repeat_byte(0xB0);
    let quote = H160::repeat_byte(0xC0);
    let relayer = H160::repeat_byte(0xEE);
    let (alice, bob) = (H160::repeat_byte(0x01), H160::repeat_byte(0x02));

    let mut accounts = MemoryAccounts::new();
    accounts.register_relayer(
        relayer,
        Relayer {
            owner: H160::repeat_byte(0xEF),
            fee_rate: U256::from(10u64),
            deposit: units("100"),
        },
    );
    for user in [alice, bob] {
        accounts.set_balance(user, base, units("1000"));
        accounts.set_balance(user, quote, units("1000000"));
    }

    let order = |side, price: &str, qty: &str, user, nonce| {
        Order::limit(side, units(price), units(qty))
            .with_tokens(base, quote)
            .with_user(user)
            .with_exchange(relayer)
            .with_nonce(nonce)
    };
    let orders = vec![
        order(Side::Sell, "100", "10", alice, 0),
        order(Side::Sell, "99", "10", alice, 1),
        order(Side::Buy, "101", "16", bob, 0),
    ];

    // Settlement path over the versioned state
    let mut processor = OrderProcessor::new(config.processor());
    let root = {
        let mut state: VersionedStore<Order, _> = VersionedStore::new(&mut store);
        let (executions, receipt) = processor.apply_batch(&mut state, &mut accounts, orders.clone(), 1, 1_700_000_000)?;
        for trade in executions.iter().flat_map(|e| e.trades.iter()) {
            info!(
                price = %from_units(trade.price, DECIMALS),
                quantity = %from_units(trade.quantity, DECIMALS),
                "trade"
            );
        }
        info!(trades = receipt.trades_executed, root = %receipt.state_root_hex(), "block executed");
        state.commit()?
    };
    info!(root = %hash_hex(&root), "state committed");
    info!(
        bob_base = %from_units(accounts.balance(bob, base), DECIMALS),
        alice_quote = %from_units(accounts.balance(alice, quote), DECIMALS),
        "balances"
    );

    // Store-backed book path with a snapshot
    let mut book = OrderBook::open(&mut store, base, quote)?;
    for incoming in orders {
        let result = book.process_order(incoming, 1_700_000_000)?;
        info!(trades = result.trades.len(), resting = result.order_in_book.is_some(), "book order");
    }
    book.commit()?;
    info!(book = %hash_hex(&book.hash()?), "book committed");
    drop(book);

    let snapshot = Snapshot::capture(&mut store, 1, &[(base, quote)])?;
    snapshot.save(&mut store)?;
    Snapshot::prune(&mut store, 1, config.snapshot.keep)?;
    Ok(())
}

fn main() -> ExitCode {
    let path = std::env::args().nth(1);
    let config = match EngineConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(backend = ?config.store.backend, "starting chainbook");
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "run failed");
            ExitCode::FAILURE
        }
    }
}
