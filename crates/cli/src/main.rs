use tracing_subscriber::{prelude::*, EnvFilter};

fn main() {
    init_logging();

    if let Err(error) = marginalia_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let console_layer =
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false);

    let _ = tracing_subscriber::registry().with(env_filter).with(console_layer).try_init();
}
