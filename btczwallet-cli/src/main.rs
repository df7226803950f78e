use anyhow::{bail, Context, Result};
use btczwallet_core::database::TxKind;
use btczwallet_core::sync::{confirmations, Confirmation, SurfaceState};
use btczwallet_core::units::{format_balance, format_price};
use btczwallet_core::{
    Database, EventHub, EventKind, Session, SessionEvent, Surface, WalletConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// BitcoinZ wallet - a thin client for a remote wallet server over Tor
#[derive(Parser)]
#[command(name = "btczwallet")]
#[command(about = "BitcoinZ wallet client for a paired wallet server", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local cache database
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// SOCKS proxy URL of the Tor client
    #[arg(long, global = true)]
    socks: Option<String>,

    /// Seconds to wait for the Tor bootstrap
    #[arg(long, global = true, default_value_t = 120)]
    bootstrap_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SurfaceArg {
    Messages,
    Mining,
}

impl From<SurfaceArg> for Surface {
    fn from(arg: SurfaceArg) -> Self {
        match arg {
            SurfaceArg::Messages => Surface::Messages,
            SurfaceArg::Mining => Surface::Mining,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PoolArg {
    Transparent,
    Shielded,
}

impl From<PoolArg> for TxKind {
    fn from(arg: PoolArg) -> Self {
        match arg {
            PoolArg::Transparent => TxKind::Transparent,
            PoolArg::Shielded => TxKind::Shielded,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pair with a wallet server
    Pair {
        /// Onion host of the wallet server
        #[arg(long)]
        host: String,

        #[arg(long)]
        api_key: String,

        /// Shared secret (will prompt if not provided)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Run the session and print events until Ctrl-C
    Run {
        /// Surfaces to activate
        #[arg(long, value_enum)]
        surface: Vec<SurfaceArg>,
    },

    /// Show cached chain info, balances and recent transactions
    Status {
        /// Number of transactions to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Add an address book entry
    BookAdd {
        #[arg(long)]
        name: String,

        #[arg(long)]
        address: String,
    },

    /// Send funds
    Cashout {
        #[arg(long, value_enum, default_value_t = PoolArg::Transparent)]
        pool: PoolArg,

        #[arg(long)]
        address: String,

        #[arg(long)]
        amount: f64,

        #[arg(long, default_value_t = 0.0001)]
        fee: f64,
    },

    /// Send a contact request to a messaging address
    ContactRequest { address: String },

    /// Accept a pending contact request
    ContactAccept { contact_id: String },

    /// Reject a pending contact request
    ContactReject { contact_id: String },

    /// Ban a contact
    ContactBan { contact_id: String },

    /// Send a message to a contact
    MessageSend {
        #[arg(long)]
        contact: String,

        #[arg(long)]
        message: String,

        #[arg(long, default_value_t = 0.0002)]
        fee: f64,
    },

    /// Mark a contact's messages as read
    MarkRead { contact_id: String },
}

fn load_config(cli: &Cli) -> Result<WalletConfig> {
    let mut config = match &cli.config {
        Some(path) => WalletConfig::load(path)?,
        None => WalletConfig::load_default()?,
    };
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(socks) = &cli.socks {
        config.socks_proxy = socks.clone();
    }
    Ok(config)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChanged { online: true, .. } => println!("Server online"),
        SessionEvent::StatusChanged {
            online: false,
            reason,
        } => println!(
            "Server offline: {}",
            reason.as_deref().unwrap_or("no response")
        ),
        SessionEvent::BalanceChanged {
            transparent,
            shielded,
        } => println!(
            "Balance: {} BTCZ transparent, {} BTCZ shielded",
            format_balance(*transparent),
            format_balance(*shielded)
        ),
        SessionEvent::TransactionObserved(tx) => println!(
            "Transaction {} {} {} BTCZ",
            tx.category.as_str(),
            tx.txid,
            format_balance(tx.amount)
        ),
        SessionEvent::ContactRosterChanged => println!("Contacts updated"),
        SessionEvent::MessageArrived {
            contact_id,
            preview,
        } => println!("Message from {}: {}", contact_id, preview),
        SessionEvent::Notify { title, body } => println!("[{}] {}", title, body),
        SessionEvent::Notice(notice) => println!("{}", notice),
        SessionEvent::MiningStats(Some(stats)) => println!(
            "Mining: {} shares, {} BTCZ balance, {} BTCZ paid",
            stats.shares,
            format_balance(stats.balance),
            format_balance(stats.paid)
        ),
        SessionEvent::MiningStats(None) => println!("Mining: off"),
        SessionEvent::IdentityBalance(balance) => {
            println!("Messaging balance: {} BTCZ", format_balance(*balance))
        }
        SessionEvent::StreamAction(action) => println!("Server push: {}", action),
    }
}

fn event_hub() -> EventHub {
    const ALL: [EventKind; 10] = [
        EventKind::StatusChanged,
        EventKind::BalanceChanged,
        EventKind::TransactionObserved,
        EventKind::ContactRosterChanged,
        EventKind::MessageArrived,
        EventKind::Notify,
        EventKind::Notice,
        EventKind::MiningStats,
        EventKind::IdentityBalance,
        EventKind::StreamAction,
    ];
    ALL.into_iter()
        .fold(EventHub::builder(), |builder, kind| {
            builder.on(kind, print_event)
        })
        .build()
}

async fn connect(session: &Session, timeout: Duration) -> Result<()> {
    info!("Waiting for Tor bootstrap");
    match tokio::time::timeout(timeout, session.connect_transport()).await {
        Ok(true) => Ok(()),
        Ok(false) => bail!("Session closed before the transport was ready"),
        Err(_) => bail!(
            "Tor bootstrap stalled at {}%",
            session.bootstrap().progress()
        ),
    }
}

fn print_status(config: &WalletConfig, limit: usize) -> Result<()> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    db.ensure_all()?;

    if db.load_credential()?.is_none() {
        println!("Not paired. Run `btczwallet pair` first.");
        return Ok(());
    }

    let chain = db.load_chain_info()?;
    match &chain {
        Some(info) => println!(
            "Height {} | 1 BTCZ = {} {}",
            info.height,
            format_price(info.price),
            info.currency.to_uppercase()
        ),
        None => println!("No chain info cached yet"),
    }

    if let Some(pair) = db.load_addresses()? {
        println!(
            "Transparent {} : {} BTCZ",
            pair.transparent_address,
            format_balance(pair.transparent_balance)
        );
        println!(
            "Shielded    {} : {} BTCZ",
            pair.shielded_address,
            format_balance(pair.shielded_balance)
        );
    }

    let height = chain.map(|info| info.height).unwrap_or(0);
    for tx in db.list_transactions(limit)? {
        let depth = confirmations(height, tx.confirmation_height, tx.kind);
        let state = match Confirmation::classify(depth, db.is_confirmed(&tx.txid)?) {
            Confirmation::Confirmed => "confirmed".to_string(),
            Confirmation::Pending(n) => format!("{} conf", n),
        };
        println!(
            "{:<7} {:>18} BTCZ  {:<10} {}",
            tx.category.as_str(),
            format_balance(tx.amount),
            state,
            tx.txid
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let bootstrap_timeout = Duration::from_secs(cli.bootstrap_timeout);

    let surfaces = Arc::new(SurfaceState::new());
    let session = Session::open(config.clone(), event_hub(), surfaces.clone())?;

    let result = run_command(cli.command, &config, &session, &surfaces, bootstrap_timeout).await;
    session.shutdown().await;
    result
}

async fn run_command(
    command: Commands,
    config: &WalletConfig,
    session: &Session,
    surfaces: &SurfaceState,
    bootstrap_timeout: Duration,
) -> Result<()> {
    match command {
        Commands::Pair {
            host,
            api_key,
            secret,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => rpassword::prompt_password("Secret key: ")?,
            };
            connect(session, bootstrap_timeout).await?;
            let info = session.pair(&host, &api_key, &secret).await?;
            println!("Paired. Server height {}", info.height);
        }
        Commands::Run { surface } => {
            if !session.is_paired()? {
                bail!("Not paired. Run `btczwallet pair` first.");
            }
            for arg in surface {
                let surface = Surface::from(arg);
                surfaces.show(surface);
                session.activate_surface(surface);
            }
            connect(session, bootstrap_timeout).await?;
            tokio::select! {
                result = session.start() => result?,
                _ = tokio::signal::ctrl_c() => return Ok(()),
            }
            println!("Session running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            println!("Stopping");
        }
        Commands::Status { limit } => print_status(config, limit)?,
        Commands::BookAdd { name, address } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            actions.add_book_entry(&name, &address).await?;
            println!("Added {} ({})", name, address);
        }
        Commands::Cashout {
            pool,
            address,
            amount,
            fee,
        } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            match actions.cashout(pool.into(), &address, amount, fee).await? {
                Some(txid) => println!("Sent, txid {}", txid),
                None => println!("Sent"),
            }
        }
        Commands::ContactRequest { address } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            actions.request_contact(&address).await?;
            println!("Request sent");
        }
        Commands::ContactAccept { contact_id } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            actions.accept_contact(&contact_id).await?;
            println!("Accepted {}", contact_id);
        }
        Commands::ContactReject { contact_id } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            actions.reject_contact(&contact_id).await?;
            println!("Rejected {}", contact_id);
        }
        Commands::ContactBan { contact_id } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            actions.ban_contact(&contact_id).await?;
            println!("Banned {}", contact_id);
        }
        Commands::MessageSend {
            contact,
            message,
            fee,
        } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            actions.send_message(&contact, &message, fee).await?;
            println!("Message sent");
        }
        Commands::MarkRead { contact_id } => {
            let actions = session.actions()?;
            connect(session, bootstrap_timeout).await?;
            let promoted = actions.mark_read(&contact_id).await?;
            println!("Marked {} message(s) read", promoted);
        }
    }
    Ok(())
}
