use std::future::Future;

use tracing::{debug, warn};

use crate::error::Result;
use crate::peer::types::IceCandidate;

/// Кандидаты, полученные до установки remote description
///
/// Holds remote candidates until a remote description exists, then drains
/// them in arrival order and turns into a pass-through marker.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    flushed: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push(candidate);
        debug!("Queued remote candidate, {} pending", self.pending.len());
    }

    /// Once flushed, new candidates must be applied directly
    pub fn is_pass_through(&self) -> bool {
        self.flushed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[IceCandidate] {
        &self.pending
    }

    /// Применяет все отложенные кандидаты после установки remote description
    ///
    /// Candidates are handed to `apply` one at a time in arrival order. A
    /// candidate that fails to apply is logged and skipped; the rest still go
    /// through. Returns how many were applied successfully.
    pub async fn flush_on<F, Fut>(&mut self, mut apply: F) -> usize
    where
        F: FnMut(IceCandidate) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.flushed = true;
        let candidates: Vec<IceCandidate> = self.pending.drain(..).collect();
        if !candidates.is_empty() {
            analyze_candidates(&candidates);
        }

        let mut applied = 0;
        for candidate in candidates {
            debug!("Applying pending candidate: {}", candidate.candidate);
            match apply(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Failed to apply pending candidate: {}", e),
            }
        }
        applied
    }
}

pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if relay_count == 0 {
        debug!("No TURN relay candidates found, connection through NAT may fail");
    }
}
