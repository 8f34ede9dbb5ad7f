use clap::Parser;

mod cli;
mod commands;
mod daemon;
mod lock;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config path: --config > DVBREC_CONFIG > ~/.dvbrec/dvbrec.toml
    let config = dvbrec_core::DvbrecConfig::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .init();

    match cli.command {
        Command::Run => daemon::run(config).await,
        Command::Channels => commands::channels(&config),
        Command::AddRecording {
            adapter,
            channel,
            program,
            begin,
            end,
            shutdown,
        } => commands::add_recording(
            &config,
            dvbrec_core::RecordingRequest {
                adapter,
                channel,
                program_name: program,
                begin_at: Some(begin),
                end_at: end,
                shutdown_after: shutdown,
            },
        ),
        Command::CancelRecording { id } => commands::cancel_recording(&config, id).map(|_| ()),
        Command::AddWakeup { at } => commands::add_wakeup(&config, at),
        Command::CancelWakeup { id } => commands::cancel_wakeup(&config, id).map(|_| ()),
        Command::List { json } => commands::list(&config, json),
        Command::Halt => commands::halt(&config),
    }
}
