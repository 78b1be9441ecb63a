mod commands;
mod wiring;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tick3t_chain::U256;
use tick3t_common::{Address, NewEvent, Tick3tError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tick3t", version, about = "Gasless ticket purchases on Base Sepolia")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current on-chain event snapshot.
    Event,

    /// Keep the event panel refreshed until Ctrl-C.
    Watch(WatchArgs),

    /// Print one ticket's owner, number and validity.
    TicketInfo(TokenArgs),

    /// Check whether an address holds a ticket for the event.
    HasTicket(HasTicketArgs),

    /// Check whether a ticket is still valid.
    VerifyTicket(TokenArgs),

    /// List event contracts deployed by the event factory.
    Events(EventsArgs),

    /// Print how many upcoming and past events the factory lists.
    EventCounts,

    /// Create an event through the factory as a sponsored operation.
    CreateEvent(CreateEventArgs),

    /// Print the smart account address for the configured owner key.
    Account,

    /// Buy one ticket through the sponsored smart account.
    Buy(BuyArgs),

    /// Settle purchases that were submitted but never confirmed.
    Resume,

    /// Encrypt a message under a Lit access condition.
    LitEncrypt(LitEncryptArgs),

    /// Decrypt a previously encrypted payload.
    LitDecrypt(LitDecryptArgs),

    /// Prove an email with the vlayer prover.
    EmailProof(EmailProofArgs),

    /// Issue a Telegram one-click login link.
    TelegramLink(TelegramLinkArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Seconds between refreshes.
    #[arg(long, default_value_t = 10)]
    interval: u64,

    /// Upper bound of the random delay added to each interval, in seconds.
    #[arg(long, default_value_t = 2)]
    jitter: u64,
}

#[derive(Args, Debug)]
struct TokenArgs {
    token_id: U256,
}

#[derive(Args, Debug)]
struct HasTicketArgs {
    owner: Address,
}

#[derive(Args, Debug)]
struct EventsArgs {
    /// List events that already took place instead of upcoming ones.
    #[arg(long, conflicts_with = "owner")]
    past: bool,

    /// Only events created by this address, past and upcoming.
    #[arg(long)]
    owner: Option<Address>,
}

#[derive(Args, Debug)]
struct CreateEventArgs {
    name: String,

    #[arg(long, default_value = "")]
    url: String,

    /// Start time in unix seconds.
    #[arg(long)]
    time: u64,

    #[arg(long, default_value = "")]
    location: String,

    #[arg(long, default_value = "")]
    photo: String,

    /// Number of tickets on sale.
    #[arg(long)]
    tickets: U256,

    /// Ticket price in ether.
    #[arg(long, default_value = "0")]
    price: String,

    /// Token metadata URI.
    #[arg(long, default_value = "")]
    uri: String,
}

impl CreateEventArgs {
    fn into_event(self) -> Result<NewEvent, Tick3tError> {
        Ok(NewEvent {
            price: commands::price_in_wei(&self.price)?,
            name: self.name,
            url: self.url,
            time: self.time,
            location: self.location,
            photo: self.photo,
            n_tickets: self.tickets,
            uri: self.uri,
        })
    }
}

#[derive(Args, Debug)]
struct BuyArgs {
    /// Prover result JSON (as printed by `email-proof`); buys through the
    /// proof-gated entry point.
    #[arg(long)]
    proof: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LitEncryptArgs {
    /// nft, tokens or balance.
    #[arg(value_name = "TYPE")]
    kind: String,
    /// Threshold in whole tokens or ether. Ignored for nft.
    amount: String,
    /// Token contract. Ignored for balance.
    contract: String,
    message: String,

    #[arg(long, default_value = "encrypted_data.json")]
    out: PathBuf,

    #[arg(long, default_value = "baseSepolia")]
    chain: String,
}

#[derive(Args, Debug)]
struct LitDecryptArgs {
    #[arg(default_value = "encrypted_data.json")]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct EmailProofArgs {
    /// Raw RFC 822 message.
    #[arg(default_value = "data/mail.eml")]
    eml: PathBuf,

    /// JSON array of DKIM TXT records for the signing domain.
    #[arg(long)]
    dns_records: Option<PathBuf>,

    #[arg(long, env = "TICK3T_CHAIN_ID", default_value_t = tick3t_common::config::DEFAULT_CHAIN_ID)]
    chain_id: u64,
}

#[derive(Args, Debug)]
struct TelegramLinkArgs {
    #[arg(long)]
    chat_id: i64,
    #[arg(long)]
    user_id: u64,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    username: Option<String>,
}

/// Every command prints one JSON object with a `success` flag, also on failure.
fn envelope(outcome: Result<Value, Tick3tError>) -> (Value, bool) {
    match outcome {
        Ok(mut value) => {
            let ok = value.get("success").and_then(Value::as_bool).unwrap_or(true);
            if let Some(map) = value.as_object_mut() {
                map.entry("success").or_insert(Value::Bool(ok));
            }
            (value, ok)
        }
        Err(e) => (
            json!({ "success": false, "error": e.to_string(), "code": e.code() }),
            false,
        ),
    }
}

fn emit(outcome: Result<Value, Tick3tError>) -> ExitCode {
    let (value, ok) = envelope(outcome);
    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // stdout carries the JSON result only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tick3t=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.cmd {
        Command::Event => commands::event().await,
        Command::Watch(args) => commands::watch(args.interval, args.jitter).await,
        Command::TicketInfo(args) => commands::ticket_info(args.token_id).await,
        Command::HasTicket(args) => commands::has_ticket(args.owner).await,
        Command::VerifyTicket(args) => commands::verify_ticket(args.token_id).await,
        Command::Events(args) => commands::events(args.past, args.owner).await,
        Command::EventCounts => commands::event_counts().await,
        Command::CreateEvent(args) => match args.into_event() {
            Ok(event) => commands::create_event(event).await,
            Err(e) => Err(e),
        },
        Command::Account => commands::account().await,
        Command::Buy(args) => commands::buy(args.proof.as_deref()).await,
        Command::Resume => commands::resume().await,
        Command::LitEncrypt(args) => {
            commands::lit_encrypt(&args.kind, &args.amount, &args.contract, &args.message, &args.chain, &args.out)
                .await
        }
        Command::LitDecrypt(args) => commands::lit_decrypt(&args.file).await,
        Command::EmailProof(args) => {
            commands::email_proof(&args.eml, args.dns_records.as_deref(), args.chain_id).await
        }
        Command::TelegramLink(args) => commands::telegram_link(tick3t_auth::TelegramLogin {
            chat_id: args.chat_id,
            user_id: args.user_id,
            first_name: args.first_name,
            last_name: args.last_name,
            username: args.username,
        }),
    };
    emit(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_lit_encrypt_positional_args() {
        let cli = Cli::try_parse_from([
            "tick3t",
            "lit-encrypt",
            "tokens",
            "0.5",
            "0x7133CF0D4597F39FFA0E5Dd19144800FD49EC47B",
            "hello",
        ])
        .unwrap();
        match cli.cmd {
            Command::LitEncrypt(args) => {
                assert_eq!(args.kind, "tokens");
                assert_eq!(args.amount, "0.5");
                assert_eq!(args.chain, "baseSepolia");
                assert_eq!(args.out, PathBuf::from("encrypted_data.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_buy_with_proof_flag() {
        let cli = Cli::try_parse_from(["tick3t", "buy", "--proof", "proof.json"]).unwrap();
        match cli.cmd {
            Command::Buy(args) => assert_eq!(args.proof, Some(PathBuf::from("proof.json"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_ticket_views_parse_token_id() {
        let cli = Cli::try_parse_from(["tick3t", "verify-ticket", "42"]).unwrap();
        match cli.cmd {
            Command::VerifyTicket(args) => assert_eq!(args.token_id, U256::from(42)),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["tick3t", "ticket-info", "forty-two"]).is_err());
        assert!(Cli::try_parse_from(["tick3t", "has-ticket", "0x1234"]).is_err());
    }

    #[test]
    fn test_events_past_and_owner_conflict() {
        let owner = "0x7133CF0D4597F39FFA0E5Dd19144800FD49EC47B";
        let cli = Cli::try_parse_from(["tick3t", "events", "--owner", owner]).unwrap();
        match cli.cmd {
            Command::Events(args) => {
                assert!(!args.past);
                assert_eq!(args.owner, Some(owner.parse().unwrap()));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["tick3t", "events", "--past", "--owner", owner]).is_err());
    }

    #[test]
    fn test_create_event_args_convert_price_to_wei() {
        let cli = Cli::try_parse_from([
            "tick3t",
            "create-event",
            "ETHGlobal Bangkok",
            "--time",
            "1731600000",
            "--tickets",
            "100",
            "--price",
            "0.01",
            "--location",
            "QSNCC",
        ])
        .unwrap();
        let Command::CreateEvent(args) = cli.cmd else {
            panic!("expected create-event");
        };
        let event = args.into_event().unwrap();
        assert_eq!(event.name, "ETHGlobal Bangkok");
        assert_eq!(event.time, 1_731_600_000);
        assert_eq!(event.n_tickets, U256::from(100));
        assert_eq!(event.price, U256::from(10_000_000_000_000_000u64));
        assert_eq!(event.location, "QSNCC");
        assert!(event.uri.is_empty());
    }

    #[test]
    fn test_create_event_rejects_bad_price() {
        for price in ["--price=-1", "--price=abc"] {
            let cli = Cli::try_parse_from([
                "tick3t", "create-event", "x", "--time", "1", "--tickets", "1", price,
            ])
            .unwrap();
            let Command::CreateEvent(args) = cli.cmd else {
                panic!("expected create-event");
            };
            assert!(matches!(args.into_event(), Err(Tick3tError::Config(_))));
        }
    }

    #[test]
    fn test_envelope_marks_success() {
        let (value, ok) = envelope(Ok(json!({ "url": "https://t.me/x" })));
        assert!(ok);
        assert_eq!(value["success"], true);

        let (value, ok) = envelope(Ok(json!({ "success": false, "error": "event is sold out" })));
        assert!(!ok);
        assert_eq!(value["success"], false);
    }

    #[test]
    fn test_envelope_on_error() {
        let (value, ok) = envelope(Err(Tick3tError::NotAuthenticated));
        assert!(!ok);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "wallet not authenticated");
        assert_eq!(value["code"], "NOT_AUTHENTICATED");
    }

    #[test]
    fn test_telegram_link_requires_identity() {
        assert!(Cli::try_parse_from(["tick3t", "telegram-link", "--chat-id", "1"]).is_err());
    }
}
