use std::process::id as get_current_pid;

use anyhow::{Context, Result};
use clap::Parser;
use pohw_registry_node as lib;
use tokio::runtime;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

mod logging;
mod opentelemetry;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    env!("COMMIT_SHA"),
    " ",
    env!("COMMIT_DATE"),
    "\n",
    env!("TARGET"),
    " ",
    env!("BUILD_DATE"),
    "\n",
    env!("CARGO_PKG_AUTHORS"),
    "\n",
    env!("CARGO_PKG_HOMEPAGE"),
    "\n",
    env!("CARGO_PKG_DESCRIPTION"),
);

#[derive(Parser)]
#[clap(version = VERSION)]
struct Options {
    #[clap(flatten)]
    log: logging::Options,
    #[clap(flatten)]
    opentelemetry: opentelemetry::Options,
    #[clap(flatten)]
    app: lib::Options,
}

fn main() -> Result<()> {
    let options = Options::parse();

    runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Error creating Tokio runtime")?
        .block_on(async {
            {
                let early_log = Registry::default().with(options.log.to_layer()?);
                let _guard = tracing::subscriber::set_default(early_log);
                tracing::subscriber::set_global_default(
                    Registry::default()
                        .with(options.log.to_layer()?)
                        .with(options.opentelemetry.to_layer()?),
                )?;
            }

            info!(
                host = env!("TARGET"),
                pid = get_current_pid(),
                commit = &env!("COMMIT_SHA")[..8],
                "{name} {version}",
                name = env!("CARGO_PKG_NAME"),
                version = env!("CARGO_PKG_VERSION"),
            );

            lib::main(options.app).await?;

            info!("Flushing traces before exit");
            opentelemetry::shutdown();

            anyhow::Ok(())
        })?;

    info!("Program terminating normally");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing::{error, warn};
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_with_log_output() {
        error!("logged on the error level");
        assert!(logs_contain("logged on the error level"));
    }

    #[tokio::test]
    #[traced_test]
    async fn async_test_with_log() {
        tracing::info!("This is being logged on the info level");

        tokio::spawn(async {
            warn!("This is being logged on the warn level from a spawned task");
        })
        .await
        .unwrap();

        assert!(logs_contain("logged on the info level"));
        assert!(logs_contain("logged on the warn level"));
        assert!(!logs_contain("logged on the error level"));
    }
}
