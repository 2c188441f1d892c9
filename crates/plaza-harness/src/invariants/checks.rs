//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use super::{ChannelStateSnapshot, Invariant, InvariantResult, SystemSnapshot, Violation};

/// Published watch views match the session after every runtime step.
pub struct ViewsMatchSession;

impl Invariant for ViewsMatchSession {
    fn name(&self) -> &'static str {
        "views_match_session"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if state.published_state != state.state {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "published state {:?} but session is {:?}",
                    state.published_state, state.state
                ),
            });
        }

        if state.published_records != state.records {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "published {} records but session holds {}",
                    state.published_records.len(),
                    state.records.len()
                ),
            });
        }

        if state.published_others != state.others {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "published {} others but session view has {}",
                    state.published_others.len(),
                    state.others.len()
                ),
            });
        }
        Ok(())
    }
}

/// The self-excluding view never contains the local user.
pub struct SelfExcluded;

impl Invariant for SelfExcluded {
    fn name(&self) -> &'static str {
        "self_excluded"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let Some(self_id) = &state.self_id else {
            return Ok(());
        };

        if state.others.iter().any(|record| &record.user_id == self_id) {
            return Err(Violation {
                invariant: self.name(),
                message: format!("self {self_id} present in others view"),
            });
        }
        Ok(())
    }
}

/// At most one live transport at any time.
pub struct SingleLiveTransport;

impl Invariant for SingleLiveTransport {
    fn name(&self) -> &'static str {
        "single_live_transport"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if state.open_transports > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{} transports open", state.open_transports),
            });
        }

        let idle = matches!(
            state.state,
            ChannelStateSnapshot::Disconnected | ChannelStateSnapshot::Failed
        );
        if idle && state.open_transports > 0 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("transport left open while {:?}", state.state),
            });
        }
        Ok(())
    }
}

/// Retry counter stays within the configured budget.
pub struct RetryBudget;

impl Invariant for RetryBudget {
    fn name(&self) -> &'static str {
        "retry_budget"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if state.retry_count > state.max_retries {
            return Err(Violation {
                invariant: self.name(),
                message: format!("retry {} exceeds max {}", state.retry_count, state.max_retries),
            });
        }
        Ok(())
    }
}

/// Sampler and driver agree on whether the position watch is active.
pub struct WatchMatchesTracking;

impl Invariant for WatchMatchesTracking {
    fn name(&self) -> &'static str {
        "watch_matches_tracking"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        if state.tracking != state.watching {
            return Err(Violation {
                invariant: self.name(),
                message: format!("tracking={} but watching={}", state.tracking, state.watching),
            });
        }
        Ok(())
    }
}
