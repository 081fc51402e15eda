//! Screencast recorder - screen recording sessions driven by FFmpeg.
//!
//! The library holds the session controller and its collaborators; the
//! `screencast` binary is a thin command line front end over
//! [`commands::recording`].

pub mod commands;
pub mod recorder;
pub mod settings;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screencast_recorder=debug,screencast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
