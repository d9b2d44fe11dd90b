use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clipscribe::cancel::{self, CancelSignal};
use clipscribe::cli::{Cli, Commands};
use clipscribe::config::Config;
use clipscribe::pipeline::{Pipeline, PipelineEvent, PipelineStep, StepStatus};
use clipscribe::{output, utils};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet, cli.log_json);

    match cli.command {
        Commands::Run {
            share_text,
            output: output_path,
            save,
            json,
            timeout,
        } => {
            let config = Config::load().await?;

            let missing_deps = utils::check_dependencies(&config.download.ffmpeg_path).await;
            if !missing_deps.is_empty() {
                eprintln!("{}", style("Dependency check warnings:").yellow());
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
            }

            let pipeline = Arc::new(Pipeline::from_config(&config)?);

            let interrupt = CancelSignal::new();
            let on_ctrl_c = interrupt.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling run");
                    on_ctrl_c.abort();
                }
            });

            let timeout = timeout.map(Duration::from_secs);
            let timeout_message = format!(
                "run timed out after {}",
                utils::format_duration(timeout.unwrap_or_default().as_secs_f64())
            );
            let (signal, guard) = cancel::compose(timeout, &timeout_message, Some(&interrupt));

            tracing::info!("Starting run for: {}", share_text);
            let (events, handle) = pipeline.spawn(share_text, Some(signal));

            if json {
                print_events(events).await?;
            } else {
                render_progress(events, cli.quiet).await;
            }

            let outcome = handle.await.context("Pipeline task failed")?;
            guard.cleanup();
            let result = outcome?;

            let target = match output_path {
                Some(path) => Some(path),
                None if save => Some(PathBuf::from(format!(
                    "{}.md",
                    utils::sanitize_filename(&result.video_info.title)
                ))),
                None => None,
            };

            match target {
                Some(path) => {
                    output::save_to_file(&result.markdown, &path).await?;
                    eprintln!("{} {}", style("Report saved to:").green(), path.display());
                }
                None if !json => println!("{}", result.markdown),
                None => {}
            }
        }
        Commands::Config { show } => {
            let config = Config::load().await?;
            if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Edit it, or set CLIPSCRIBE_* environment variables, then run `clipscribe config --show`.");
            }
        }
        Commands::Steps => {
            println!("Pipeline steps:");
            for step in PipelineStep::ALL {
                println!(
                    "  {}. {} ({}) - {}",
                    step.index() + 1,
                    step.label(),
                    step.as_str(),
                    step.description()
                );
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, quiet: bool, json: bool) {
    let default_filter = if verbose {
        "clipscribe=debug"
    } else if quiet {
        "clipscribe=warn"
    } else {
        "clipscribe=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// One JSON object per line on stdout
async fn print_events(mut events: UnboundedReceiver<PipelineEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn render_progress(mut events: UnboundedReceiver<PipelineEvent>, quiet: bool) {
    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(120));

    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Progress(update) => {
                progress.set_position(update.percentage as u64);
                let message = match &update.detail {
                    Some(detail) => format!("{} ({})", update.label, detail),
                    None => update.label.clone(),
                };
                if update.status == StepStatus::Completed {
                    progress.println(format!("{} {}", style("✓").green(), message));
                } else {
                    progress.set_message(message);
                }
            }
            PipelineEvent::Info { video_info } => {
                progress.println(format!(
                    "{} {} by {}",
                    style("Video:").bold(),
                    video_info.title,
                    video_info.author
                ));
            }
            PipelineEvent::Partial { .. } => {}
            PipelineEvent::Done { .. } => {
                progress.finish_with_message("Done");
            }
            PipelineEvent::Error { message, .. } => {
                progress.abandon_with_message(format!("{} {}", style("Failed:").red(), message));
            }
        }
    }
}
