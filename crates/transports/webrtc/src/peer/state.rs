//! Per-connection negotiation state machine

use crate::{Error, Result};

/// Negotiation progress of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Handle created, no remote description yet
    New,
    /// Remote offer applied, local answer not yet produced
    HaveRemoteOffer,
    /// Answer sent, waiting for the transport
    Negotiating,
    /// Transport reports success
    Connected,
    Failed,
    Closed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }

    /// Whether a remote description has been applied
    pub fn has_remote_description(&self) -> bool {
        matches!(
            self,
            NegotiationState::HaveRemoteOffer
                | NegotiationState::Negotiating
                | NegotiationState::Connected
        )
    }

    /// Check that a remote offer may be applied in this state
    pub fn accept_offer(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::NegotiationFailure(format!(
                "Cannot apply offer in state {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Check that a remote answer may be applied in this state
    ///
    /// `local_offer_pending` is whether a server-initiated offer awaits its answer.
    pub fn accept_answer(&self, local_offer_pending: bool) -> Result<()> {
        if self.is_terminal() || !local_offer_pending {
            return Err(Error::NegotiationFailure(format!(
                "No outstanding local offer in state {:?}",
                self
            )));
        }
        Ok(())
    }

    /// State after the transport reports it connected
    pub fn on_transport_connected(self) -> Self {
        match self {
            NegotiationState::HaveRemoteOffer | NegotiationState::Negotiating => {
                NegotiationState::Connected
            }
            other => other,
        }
    }
}

/// Validate SDP text carried by an `offer` or `answer` message
///
/// `expected` is `"offer"` or `"answer"`; `sdp_type` is the message's `type` field.
pub fn validate_sdp(expected: &str, sdp_type: &str, sdp: &str) -> Result<()> {
    if sdp_type != expected {
        return Err(Error::NegotiationFailure(format!(
            "Expected SDP type {}, got {}",
            expected, sdp_type
        )));
    }
    if !sdp.starts_with("v=0") {
        return Err(Error::NegotiationFailure(
            "Invalid SDP: must start with v=0".to_string(),
        ));
    }
    Ok(())
}

/// Validate an inbound ICE candidate line
///
/// Returns `false` for the empty end-of-candidates marker, which callers skip.
pub fn validate_candidate(candidate: &str) -> Result<bool> {
    if candidate.is_empty() {
        return Ok(false);
    }
    if !candidate.starts_with("candidate:") {
        return Err(Error::NegotiationFailure(format!(
            "Malformed ICE candidate: {}",
            candidate
        )));
    }
    Ok(true)
}
