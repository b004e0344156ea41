use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = coursepress::cli::Cli::parse();
    let directive = coursepress::logging::directive_for_verbosity(cli.verbose);
    coursepress::logging::init(directive).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        coursepress::cli::Command::Manifest(args) => {
            coursepress::preview::manifest(args, &cancel)
                .await
                .context("manifest")?;
        }
        coursepress::cli::Command::Lesson(args) => {
            let slug = args.slug.clone();
            coursepress::preview::lesson(args, &cancel)
                .await
                .with_context(|| format!("lesson {slug}"))?;
        }
        coursepress::cli::Command::Render(args) => {
            coursepress::preview::render(args).context("render")?;
        }
    }

    Ok(())
}
