use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use recs_trainer::{
    cli::{self, Cli},
    observability,
};

#[tokio::main]
async fn main() -> ExitCode {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                file = location.file(),
                line = location.line(),
                message,
                "panic occurred"
            );
        } else {
            error!(message, "panic occurred without location information");
        }
    }));

    if let Err(err) = observability::init() {
        eprintln!("failed to initialise tracing: {err:#}");
    }

    let cli = Cli::parse();
    let status = cli::execute(cli).await;
    observability::shutdown();

    status.into()
}
