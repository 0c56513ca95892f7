//! `tracing`/`tracing-subscriber` init, replacing the teacher's bare
//! `println!`/`eprintln!` reconciler logging (`SPEC_FULL.md` §1). The
//! process startup banner is still printed with `owo_colors`, matching the
//! teacher's one colored line on boot; everything from the control loops
//! onward goes through `tracing` so it can be filtered and (optionally)
//! emitted as JSON for log aggregation.

use owo_colors::OwoColorize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global `tracing` subscriber from `RUST_LOG` (default
/// `info`), optionally formatting as JSON when `LOG_FORMAT=json`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let disable_colors = std::env::var("DISABLE_COLORS").map(|v| v == "1" || v == "true").unwrap_or(false);
    owo_colors::set_override(!disable_colors);
}

pub fn print_banner(name: &str, version: &str) {
    println!("{} {}", format!("⚙️  {name}").green().bold(), format!("v{version}").green().dimmed());
}
