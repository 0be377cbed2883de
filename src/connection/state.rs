//! Connection state machine

use crate::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state (not connected)
    Initial,

    /// TLS negotiation in progress (SSLRequest sent, awaiting S/N response)
    NegotiatingTls,

    /// Startup sent, awaiting authentication request
    AwaitingAuth,

    /// Authentication in progress
    Authenticating,

    /// Idle (ready for query)
    Idle,

    /// Query in progress
    QueryInProgress,

    /// Reading query results
    ReadingResults,

    /// Link failed mid-exchange; the stream is out of sync with the server
    Broken,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initial, NegotiatingTls)
                | (Initial, AwaitingAuth)
                | (NegotiatingTls, AwaitingAuth)
                | (AwaitingAuth, Authenticating)
                | (Authenticating, Idle)
                | (Idle, QueryInProgress)
                | (QueryInProgress, ReadingResults)
                | (ReadingResults, Idle)
                | (Initial, Broken)
                | (NegotiatingTls, Broken)
                | (AwaitingAuth, Broken)
                | (Authenticating, Broken)
                | (Idle, Broken)
                | (QueryInProgress, Broken)
                | (ReadingResults, Broken)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }

    /// Check that a new query may be issued from this state.
    ///
    /// A connection left mid-query (for example by a dropped future) reports
    /// busy; a broken or closed one reports an invalid state.
    pub fn ensure_idle(&self) -> Result<()> {
        match self {
            Self::Idle => Ok(()),
            Self::QueryInProgress | Self::ReadingResults => Err(Error::ConnectionBusy(format!(
                "connection in state: {}",
                self
            ))),
            other => Err(Error::InvalidState {
                expected: Self::Idle.to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::AwaitingAuth => write!(f, "awaiting_auth"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Idle => write!(f, "idle"),
            Self::QueryInProgress => write!(f, "query_in_progress"),
            Self::ReadingResults => write!(f, "reading_results"),
            Self::Broken => write!(f, "broken"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ErrorKind;

    #[test]
    fn test_valid_transitions() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::AwaitingAuth).is_ok());
        assert!(state.transition(ConnectionState::Authenticating).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_ok());
        assert!(state.transition(ConnectionState::QueryInProgress).is_ok());
        assert!(state.transition(ConnectionState::ReadingResults).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_ok());
    }

    #[test]
    fn test_invalid_transition() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::Idle).is_err());
    }

    #[test]
    fn test_close_from_any_state() {
        let mut state = ConnectionState::QueryInProgress;
        assert!(state.transition(ConnectionState::Closed).is_ok());
    }

    #[test]
    fn test_tls_negotiation_transitions() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::NegotiatingTls).is_ok());
        assert!(state.transition(ConnectionState::AwaitingAuth).is_ok());
    }

    #[test]
    fn test_broken_is_terminal_except_close() {
        let mut state = ConnectionState::ReadingResults;
        assert!(state.transition(ConnectionState::Broken).is_ok());
        assert!(state.transition(ConnectionState::Idle).is_err());
        assert!(state.transition(ConnectionState::Broken).is_err());
        assert!(state.transition(ConnectionState::Closed).is_ok());
    }

    #[test]
    fn test_ensure_idle() {
        assert!(ConnectionState::Idle.ensure_idle().is_ok());

        let busy = ConnectionState::ReadingResults.ensure_idle().unwrap_err();
        assert!(matches!(busy, Error::ConnectionBusy(_)));
        assert_eq!(busy.kind(), ErrorKind::HandleInvalid);

        for state in [ConnectionState::Broken, ConnectionState::Closed] {
            let err = state.ensure_idle().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::HandleInvalid, "{}", state);
        }
    }
}
