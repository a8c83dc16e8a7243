//! skillbot terminal REPL
//!
//! Chats with the configured LLM provider using the demo time-concierge
//! skill. Provider selection comes from `LLM_*` environment variables
//! (a `.env` file is honored). Ctrl-C cancels the turn in flight.

mod demo;

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skillbot_core::{Bot, Orchestrator, TurnHandle};
use skillbot_runtime::{build_adapter, AdapterConfig};

const QUIT: &str = "/quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AdapterConfig::from_env()?;
    let adapter = build_adapter(&config)?;

    let orchestrator = Orchestrator::builder()
        .adapter(adapter)
        .memory_limit(config.memory_limit)
        .build()?;

    let mut bot = Bot::builder(demo::PERSONA)
        .memory_limit(config.memory_limit)
        .skill(demo::time_concierge()?)
        .build()?;

    tracing::info!(bot_id = %bot.id(), adapter = %config.kind, model = %config.model, "Bot ready");
    println!("skillbot ({} / {}). Type {} to exit.", config.kind, config.model, QUIT);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == QUIT {
            break;
        }

        let handle = TurnHandle::new();
        let interrupt = {
            let handle = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.cancel();
                }
            })
        };

        let mut print_reply = |message: &str| {
            if !message.is_empty() {
                println!("bot: {}", message);
            }
        };
        let result = orchestrator
            .send_message_with_handle(&mut bot, input, Some(&mut print_reply), &handle)
            .await;
        interrupt.abort();

        match result {
            Ok(_) if handle.is_cancelled() => println!("(cancelled)"),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Turn failed");
                println!("error: {}", e.user_message());
            }
        }

        if bot.is_done() {
            println!("(the bot considers this conversation complete)");
        }
    }

    Ok(())
}
