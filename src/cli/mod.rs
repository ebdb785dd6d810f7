use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod chat;
pub mod upload;

use crate::core::AppConfig;

#[derive(Subcommand)]
enum Command {
    /// Ask a question, get resources and a video, then keep chatting
    Ask {
        #[arg(long, default_value = "")]
        question: String,

        /// Additional context sent along with the question
        #[arg(long)]
        context: Option<String>,

        /// Path to an image of the problem
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Start a chat with the tutor without an initial question
    Chat {},
    /// Print the imageSelected message for an image as the upload page sends it
    Upload {
        #[arg(long)]
        image: PathBuf,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Base URL of the math help backend
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        // Keep stdout for the transcript
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let config = match &args.api_url {
        Some(url) => AppConfig::default().with_api_url(url),
        None => AppConfig::default(),
    };

    // Handle each sub command
    match args.command {
        Some(Command::Ask {
            question,
            context,
            image,
        }) => {
            let question = chat::Question {
                text: question,
                context,
                image,
            };
            chat::run(&config, Some(question)).await?;
        }
        Some(Command::Chat {}) => {
            chat::run(&config, None).await?;
        }
        Some(Command::Upload { image }) => {
            upload::run(&image)?;
        }
        None => {}
    }

    Ok(())
}
