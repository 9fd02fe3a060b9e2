use std::time::Instant;

use crate::config::RegistrarConfig;
use crate::Registrar;

/// Shared state handed to every HTTP handler.
pub struct RegistrarState {
    pub registrar: Registrar,
    pub config: RegistrarConfig,
    /// When the server started, reported by `/health`
    pub started_at: Instant,
}

impl RegistrarState {
    pub fn new(registrar: Registrar, config: RegistrarConfig) -> Self {
        Self {
            registrar,
            config,
            started_at: Instant::now(),
        }
    }
}
