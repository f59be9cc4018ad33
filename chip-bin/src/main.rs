use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use chip_core::{
    config::Config,
    controller::{
        Change, ConversationController, RejectReason, SubmitOutcome, TranscriptEvent,
        TranscriptObserver,
    },
    model::{MessageId, Role, SUGGESTED_QUERIES},
    transport::ProxyClient,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Chip enrolment assistant chat client", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). Without it, CHIP_ENDPOINT_URL and
    /// CHIP_AUTH_TOKEN are used.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and stream the answer
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Interactive conversation (/reset starts over, /quit exits)
    Repl,
    /// Print the suggested quick queries
    Suggestions,
}

/// Prints assistant text as it streams in.
#[derive(Default)]
struct StdoutPrinter {
    // id of the message being printed and how many bytes of it are out
    cursor: Mutex<Option<(MessageId, usize)>>,
}

impl TranscriptObserver for StdoutPrinter {
    fn on_event(&self, event: &TranscriptEvent) {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        match &event.change {
            Change::Appended(id) | Change::Updated(id) => {
                let Some(msg) = event.snapshot.iter().rev().find(|m| &m.id == id) else {
                    return;
                };
                if msg.role != Role::Assistant {
                    return;
                }
                let printed = match cursor.as_ref() {
                    Some((cur, n)) if cur == id => *n,
                    _ => 0,
                };
                print!("{}", &msg.content[printed..]);
                io::stdout().flush().ok();
                *cursor = Some((id.clone(), msg.content.len()));
            }
            Change::Closed(_) => {
                println!();
                *cursor = None;
            }
            Change::TurnFailed { user_message } => {
                if cursor.take().is_some() {
                    println!();
                }
                eprintln!("[error: {user_message}]");
            }
            Change::Reset => {
                *cursor = None;
                println!("{}", event.snapshot.first().map_or("", |m| m.content.as_str()));
            }
            _ => {}
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let cfg = match path {
        Some(p) => Config::from_path(p)?,
        None => Config::from_env()?,
    };
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Suggestions = cli.command {
        for q in SUGGESTED_QUERIES {
            println!("{q}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = load_config(cli.config.as_ref())?;
    let transport = ProxyClient::from_config(&cfg)?;
    let controller = ConversationController::with_welcome(transport, cfg.welcome_text());
    controller.subscribe(Arc::new(StdoutPrinter::default()));

    match cli.command {
        Commands::Chat { message } => {
            // The printer already reported the failure on stderr.
            if let Err(e) = controller.submit(&message).await {
                tracing::debug!(error = %e, "chat failed");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Repl => {
            println!("{}", cfg.welcome_text());
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("> ");
                io::stdout().flush().ok();
                let Some(line) = lines.next_line().await? else {
                    break;
                };
                match line.trim() {
                    "/quit" | "/exit" => break,
                    "/reset" => {
                        controller.reset();
                        continue;
                    }
                    _ => {}
                }
                match controller.submit(&line).await {
                    Ok(SubmitOutcome::Rejected(RejectReason::EmptyInput)) => {}
                    Ok(SubmitOutcome::Completed { message_id: None }) => {
                        println!("[no response]");
                    }
                    Ok(_) => {}
                    // The printer already showed the user-facing message.
                    Err(e) => tracing::debug!(error = %e, "turn failed"),
                }
            }
        }
        Commands::Suggestions => {}
    }

    Ok(ExitCode::SUCCESS)
}
