// src/logging.rs

use crate::config::Settings;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Inicjalizacja logowania: EnvFilter (RUST_LOG, potem `logging.level`)
/// + formatter tekstowy albo JSON (`logging.json`).
/// Drugie wywołanie jest no-op (testy, CLI).
pub fn init(settings: &Settings) {
    let level = settings
        .logging
        .level
        .clone()
        .unwrap_or_else(|| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let res = if settings.logging.json.unwrap_or(false) {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
