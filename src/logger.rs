use once_cell::sync::OnceCell;
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::peer::types::IceCandidate;

static INIT: OnceCell<()> = OnceCell::new();

/// Логирование с временными метками
///
/// Installs the global subscriber once. Does nothing when logging is
/// switched off in `config`, or when another subscriber is already set.
pub fn init() {
    if !enabled() {
        return;
    }
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("peercall=debug,webrtc=warn"));
        let _ = tracing_subscriber::fmt()
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

pub fn enabled() -> bool {
    crate::config::LOGGING_ENABLED && crate::config::dev::ENABLE_LOGGING
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn describe_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_m_line_index, cand.username_fragment
    );
}
