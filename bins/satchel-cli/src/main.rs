//! satchel — command-line front end for the Satchel wallet engine.
//!
//! Every command maps onto one engine command. Passwords are read from the
//! terminal without echo. `--json` prints machine-readable results, and
//! errors as `{"error": <kind>, "message": ...}`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use satchel_core::constants::{COIN, Network};
use satchel_esplora::{EsploraClient, ProviderConfig};
use satchel_wallet::{Direction, ProviderSet, WalletConfig, WalletEngine, WalletError};
use serde::Serialize;
use tracing::debug;

/// Satchel HD Bitcoin wallet.
#[derive(Parser)]
#[command(name = "satchel")]
#[command(version, about = "HD Bitcoin wallet with Random-Improve coin selection")]
struct Cli {
    /// Path to wallet file (default: ~/.satchel/wallet.dat or $SATCHEL_WALLET).
    #[arg(short, long, global = true)]
    wallet: Option<PathBuf>,

    /// Esplora base URL used for every network (default: mempool.space).
    #[arg(long, global = true)]
    esplora: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet file management.
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Account management.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Show coin types and accounts.
    Overview,
    /// Sync and show an account balance.
    Balance(AccountArgs),
    /// List an account's transactions.
    History(AccountArgs),
    /// List handed-out receive addresses with their usage.
    Addresses(AccountArgs),
    /// Hand out a new receive address.
    Receive(AccountArgs),
    /// Check an address for the given coin type.
    Validate(ValidateArgs),
    /// Show recommended fee rates.
    Fees(CoinArgs),
    /// Send a payment.
    Send(SendArgs),
}

#[derive(Subcommand)]
enum WalletAction {
    /// Create a new wallet and show its backup phrase.
    Create(CreateArgs),
    /// Restore a wallet from its backup phrase.
    Restore(RestoreArgs),
    /// Whether a wallet file exists.
    Exists,
    /// Re-encrypt the wallet under a new password.
    ChangePassword,
}

#[derive(Subcommand)]
enum AccountAction {
    /// Derive the next account of a coin type.
    Create(CoinArgs),
}

#[derive(Args)]
struct CreateArgs {
    /// Backup phrase length: 12, 15, 18, 21 or 24 words.
    #[arg(long, default_value_t = 12)]
    words: usize,

    /// Prompt for an optional BIP-39 passphrase.
    #[arg(long)]
    passphrase: bool,
}

#[derive(Args)]
struct RestoreArgs {
    /// Backup phrase. If not provided, will prompt securely.
    #[arg(short, long)]
    mnemonic: Option<String>,

    /// Prompt for the BIP-39 passphrase used at creation.
    #[arg(long)]
    passphrase: bool,
}

#[derive(Args)]
struct CoinArgs {
    /// BIP-44 coin type: 0 = mainnet, 1 = testnet.
    #[arg(short, long, default_value_t = 1)]
    coin: u32,
}

#[derive(Args)]
struct AccountArgs {
    #[command(flatten)]
    coin: CoinArgs,

    /// Account index.
    #[arg(short, long, default_value_t = 0)]
    account: u32,
}

#[derive(Args)]
struct ValidateArgs {
    /// Address to check.
    address: String,

    #[command(flatten)]
    coin: CoinArgs,
}

#[derive(Args)]
struct SendArgs {
    #[command(flatten)]
    from: AccountArgs,

    /// Recipient address.
    #[arg(short, long)]
    to: String,

    /// Amount in satoshis.
    #[arg(long)]
    amount: u64,

    /// Fee rate in sat/vB (default: the half-hour recommendation).
    #[arg(long)]
    fee_rate: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    if let Err(e) = run(cli) {
        if json {
            let kind = e.downcast_ref::<WalletError>().map_or("error", WalletError::kind);
            let body = serde_json::json!({ "error": kind, "message": format!("{e:#}") });
            println!("{body}");
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let engine = build_engine(cli.wallet, cli.esplora)?;
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Wallet { action } => match action {
            WalletAction::Create(args) => wallet_create(&engine, &out, args),
            WalletAction::Restore(args) => wallet_restore(&engine, &out, args),
            WalletAction::Exists => {
                let exists = engine.does_wallet_exist();
                out.print(&exists, || println!("{exists}"))
            }
            WalletAction::ChangePassword => change_password(&engine, &out),
        },
        Commands::Account { action } => match action {
            AccountAction::Create(args) => account_create(&engine, &out, args),
        },
        Commands::Overview => overview(&engine, &out),
        Commands::Balance(args) => balance(&engine, &out, args),
        Commands::History(args) => history(&engine, &out, args),
        Commands::Addresses(args) => addresses(&engine, &out, args),
        Commands::Receive(args) => receive(&engine, &out, args),
        Commands::Validate(args) => validate(&engine, &out, args),
        Commands::Fees(args) => fees(&engine, &out, args),
        Commands::Send(args) => send(&engine, &out, args),
    }
}

fn build_engine(wallet: Option<PathBuf>, esplora: Option<String>) -> Result<WalletEngine> {
    let mut config = WalletConfig::from_env().context("Invalid wallet configuration")?;
    if let Some(path) = wallet {
        config = config.with_wallet_path(path);
    }

    let mut provider_config = ProviderConfig::from_env().context("Invalid provider configuration")?;
    if let Some(url) = esplora {
        for network in Network::ALL {
            provider_config.set_url(network, url.clone());
        }
    }

    let mut providers = ProviderSet::new();
    for network in Network::ALL {
        let client = EsploraClient::from_config(&provider_config, network)
            .with_context(|| format!("Failed to create {network} client"))?;
        debug!(%network, url = client.base_url(), "provider configured");
        providers = providers.with(network, Arc::new(client));
    }

    Ok(WalletEngine::new(config, providers))
}

struct Output {
    json: bool,
}

impl Output {
    /// Print `value` as JSON, or run `human` for the terminal.
    fn print<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value).context("Failed to encode output")?);
        } else {
            human();
        }
        Ok(())
    }
}

/// Create a new wallet with a random seed.
fn wallet_create(engine: &WalletEngine, out: &Output, args: CreateArgs) -> Result<()> {
    if engine.does_wallet_exist() {
        bail!("Wallet file already exists: {}", engine.config().wallet_path.display());
    }
    let password = prompt_new_password()?;
    let passphrase = if args.passphrase { prompt_password("BIP-39 passphrase")? } else { String::new() };

    let mnemonic = engine
        .create_wallet(&password, args.words, &passphrase)
        .context("Failed to create wallet")?;

    let path = engine.config().wallet_path.display().to_string();
    out.print(&serde_json::json!({ "mnemonic": mnemonic.as_str(), "path": path }), || {
        println!("\n=== WALLET CREATED ===");
        println!("\nSEED PHRASE (BACK THIS UP, {} WORDS):", args.words);
        println!("  {}", mnemonic.as_str());
        println!("\nWARNING: This seed phrase will NOT be shown again.");
        println!("Store it in a secure location. Anyone with this phrase can access your funds.");
        println!("\nWallet saved to: {path}");
    })
}

/// Restore a wallet from a backup phrase.
fn wallet_restore(engine: &WalletEngine, out: &Output, args: RestoreArgs) -> Result<()> {
    if engine.does_wallet_exist() {
        bail!("Wallet file already exists: {}", engine.config().wallet_path.display());
    }
    let mnemonic = match args.mnemonic {
        Some(m) => m,
        None => prompt_password("Enter backup phrase")?,
    };
    let passphrase = if args.passphrase { prompt_password("BIP-39 passphrase")? } else { String::new() };
    let password = prompt_new_password()?;

    engine
        .restore_wallet(&mnemonic, &passphrase, &password)
        .context("Failed to restore wallet")?;

    let path = engine.config().wallet_path.display().to_string();
    out.print(&serde_json::json!({ "path": path }), || {
        println!("\n=== WALLET RESTORED ===");
        println!("Wallet saved to: {path}");
        println!("Run `satchel account create` for each account you used before.");
    })
}

fn change_password(engine: &WalletEngine, out: &Output) -> Result<()> {
    let old = prompt_password("Current password")?;
    let new = prompt_new_password()?;
    engine.change_password(&old, &new).context("Failed to change password")?;
    out.print(&serde_json::json!({ "changed": true }), || println!("Password changed."))
}

fn account_create(engine: &WalletEngine, out: &Output, args: CoinArgs) -> Result<()> {
    let password = prompt_password("Wallet password")?;
    let summary = engine
        .create_new_account(args.coin, &password)
        .context("Failed to create account")?;
    out.print(&summary, || {
        println!("\n=== ACCOUNT CREATED ===");
        println!("Path:  m/44'/{}'/{}'", summary.coin_type, summary.index);
        println!("xpub:  {}", summary.xpub);
    })
}

fn overview(engine: &WalletEngine, out: &Output) -> Result<()> {
    unlock(engine)?;
    let overview = engine.get_accounts_overview()?;
    out.print(&overview, || {
        println!("\n=== ACCOUNTS ===");
        for coin in &overview.coin_types {
            println!("{} (coin type {})", coin.name, coin.index);
            if coin.accounts.is_empty() {
                println!("  (no accounts)");
            }
            for account in &coin.accounts {
                println!(
                    "  account {}  receive next {}  change next {}  used {}",
                    account.index, account.next_receive_index, account.next_change_index, account.used_addresses
                );
            }
        }
    })
}

fn balance(engine: &WalletEngine, out: &Output, args: AccountArgs) -> Result<()> {
    unlock(engine)?;
    let balance = engine
        .get_account_balance(args.coin.coin, args.account)
        .context("Failed to sync balance")?;
    out.print(&balance, || {
        println!("\n=== BALANCE ===");
        println!("Confirmed:   {}", format_btc(balance.confirmed));
        println!("Unconfirmed: {}", format_btc(balance.unconfirmed));
        println!("Total:       {}", format_btc(balance.total()));
        println!("UTXOs:       {}", balance.utxo_count);
    })
}

fn history(engine: &WalletEngine, out: &Output, args: AccountArgs) -> Result<()> {
    unlock(engine)?;
    let txs = engine
        .get_simple_transactions(args.coin.coin, args.account)
        .context("Failed to fetch history")?;
    out.print(&txs, || {
        println!("\n=== TRANSACTIONS ===");
        if txs.is_empty() {
            println!("(none)");
        }
        for tx in &txs {
            let when = tx
                .block_time
                .map_or_else(|| "unconfirmed".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
            let sign = match tx.direction {
                Direction::Incoming => "+",
                Direction::Outgoing => "-",
                Direction::Internal => " ",
            };
            println!("{when:>16}  {sign}{}  fee {}  {}", format_btc(tx.value), tx.fee, tx.txid);
        }
    })
}

fn addresses(engine: &WalletEngine, out: &Output, args: AccountArgs) -> Result<()> {
    unlock(engine)?;
    let marked = engine
        .get_all_receive_addresses_marked(args.coin.coin, args.account)
        .context("Failed to refresh addresses")?;
    out.print(&marked, || {
        println!("\n=== RECEIVE ADDRESSES ===");
        for m in &marked {
            println!("{:>4}  {}  {}", m.index, m.address, if m.used { "used" } else { "unused" });
        }
    })
}

fn receive(engine: &WalletEngine, out: &Output, args: AccountArgs) -> Result<()> {
    let password = prompt_password("Wallet password")?;
    let address = engine
        .get_new_receive_address(args.coin.coin, args.account, &password)
        .context("Failed to allocate address")?;
    out.print(&address, || println!("{address}"))
}

fn validate(engine: &WalletEngine, out: &Output, args: ValidateArgs) -> Result<()> {
    engine.validate_address(&args.address, args.coin.coin)?;
    out.print(&serde_json::json!({ "valid": true }), || println!("valid"))
}

fn fees(engine: &WalletEngine, out: &Output, args: CoinArgs) -> Result<()> {
    let fees = engine.get_recommended_fees(args.coin).context("Failed to fetch fees")?;
    out.print(&fees, || {
        println!("\n=== FEES (sat/vB) ===");
        println!("Fastest:   {}", fees.fastest_fee);
        println!("Half hour: {}", fees.half_hour_fee);
        println!("Hour:      {}", fees.hour_fee);
        println!("Economy:   {}", fees.economy_fee);
        println!("Minimum:   {}", fees.minimum_fee);
    })
}

fn send(engine: &WalletEngine, out: &Output, args: SendArgs) -> Result<()> {
    let coin = args.from.coin.coin;
    engine.validate_address(&args.to, coin)?;
    let fee_rate = match args.fee_rate {
        Some(rate) => rate,
        None => engine.get_recommended_fees(coin).context("Failed to fetch fees")?.half_hour_fee,
    };
    let password = prompt_password("Wallet password")?;

    let total = engine
        .send_transaction(coin, args.from.account, &args.to, args.amount, fee_rate, &password)
        .context("Failed to send transaction")?;

    out.print(&serde_json::json!({ "total_sent": total, "fee": total - args.amount }), || {
        println!("\n=== TRANSACTION SENT ===");
        println!("To:     {}", args.to);
        println!("Amount: {}", format_btc(args.amount));
        println!("Fee:    {} sat ({fee_rate} sat/vB)", total - args.amount);
        println!("Total:  {}", format_btc(total));
    })
}

/// Prompt for the password and load the public tree.
fn unlock(engine: &WalletEngine) -> Result<()> {
    let password = prompt_password("Wallet password")?;
    engine.load_master_key(&password).context("Failed to load wallet (check password)")
}

fn prompt_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(format!("{prompt}: ")).context("Failed to read password")
}

fn prompt_new_password() -> Result<String> {
    let password = prompt_password("Enter new wallet password")?;
    let confirm = prompt_password("Confirm password")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

/// Satoshis as a fixed-point BTC amount.
fn format_btc(sats: u64) -> String {
    format!("{}.{:08} BTC", sats / COIN, sats % COIN)
}
