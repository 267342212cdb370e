use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Initialize logging
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

/// Print a prompt and read one trimmed line
pub fn prompt<R: BufRead>(input: &mut R, label: &str) -> Result<String> {
    print!("{}: ", label);
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    let read = input.read_line(&mut line).context("Failed to read from stdin")?;
    if read == 0 {
        anyhow::bail!("Input closed while waiting for: {}", label);
    }

    Ok(line.trim().to_string())
}
