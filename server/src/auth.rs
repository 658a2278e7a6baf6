//! Inbound credential verification and write-mode gating. See
//! SPEC_FULL.md §4.K. The outer request/response transport that extracts the
//! bearer token from a request is out of scope (§1); this module only
//! implements the comparison and the gate.

use vibe_core::error::VibeError;

pub struct AuthGate {
    configured_token: Option<String>,
    read_only: bool,
}

impl AuthGate {
    pub fn new(configured_token: Option<String>, read_only: bool) -> Self {
        Self { configured_token, read_only }
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Verify a presented bearer token against the configured one in
    /// constant time. If no token is configured, every request is allowed.
    pub fn authenticate(&self, presented: Option<&str>) -> bool {
        match &self.configured_token {
            None => true,
            Some(expected) => match presented {
                Some(got) => constant_time_eq(expected.as_bytes(), got.as_bytes()),
                None => false,
            },
        }
    }

    /// Every write-engine entry point calls this first; in read-only mode it
    /// rejects before any filesystem or store access.
    pub fn check_write_allowed(&self) -> Result<(), VibeError> {
        if self.read_only {
            Err(VibeError::authorization_denied("server is running in read-only mode"))
        } else {
            Ok(())
        }
    }
}

/// Constant-time byte comparison — avoids leaking how much of a token
/// matched through early-exit timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_token_configured_allows_everything() {
        let gate = AuthGate::new(None, false);
        assert!(gate.authenticate(None));
        assert!(gate.authenticate(Some("anything")));
    }

    #[test]
    fn mismatched_token_is_rejected() {
        let gate = AuthGate::new(Some("secret-token".to_string()), false);
        assert!(gate.authenticate(Some("secret-token")));
        assert!(!gate.authenticate(Some("wrong-token")));
        assert!(!gate.authenticate(None));
    }

    #[test]
    fn read_only_mode_blocks_writes() {
        let gate = AuthGate::new(None, true);
        assert!(gate.check_write_allowed().is_err());
        let gate = AuthGate::new(None, false);
        assert!(gate.check_write_allowed().is_ok());
    }
}
