//! Tracing setup for the server binary

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber, writing to stderr
///
/// # Arguments
///
/// * `crate_name` - Target that gets an `info` directive on top of `RUST_LOG`
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(crate_name: &str) -> anyhow::Result<()> {
    let directive = format!("{}=info", crate_name);
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    if json_requested(std::env::var("LOG_FORMAT").ok().as_deref()) {
        registry.with(stderr.json()).try_init()?;
    } else {
        registry.with(stderr.with_ansi(false)).try_init()?;
    }

    Ok(())
}

/// `LOG_FORMAT=json` selects structured output
fn json_requested(log_format: Option<&str>) -> bool {
    log_format.is_some_and(|v| v.eq_ignore_ascii_case("json"))
}
