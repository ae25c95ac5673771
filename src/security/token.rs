//! Action-scoped anti-forgery tokens.
//!
//! A token is a keyed hash over a time tick, the action name, and the
//! caller's user id and session. Ticks are half a lifetime long and a token
//! verifies for the current and the previous tick, so it stays valid for
//! between one half and one full lifetime.

use std::sync::Arc;

use crate::security::identity::Identity;
use crate::store::Clock;

/// The one action name every command's token is bound to.
pub const TOKEN_ACTION: &str = "command_gateway_action";

/// Hex characters kept from the hash.
const TOKEN_LEN: usize = 20;

/// Which tick a valid token was minted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAge {
    /// Minted in the current tick.
    Fresh,
    /// Minted in the previous tick; should be refreshed soon.
    Aging,
}

/// Issues and verifies anti-forgery tokens.
#[derive(Clone)]
pub struct TokenService {
    key: [u8; 32],
    lifetime_secs: u64,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(secret: &str, lifetime_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: blake3::derive_key("command-gateway anti-forgery token v1", secret.as_bytes()),
            lifetime_secs: lifetime_secs.max(2),
            clock,
        }
    }

    /// Name of the shared action tokens are issued for.
    pub fn action_name() -> &'static str {
        TOKEN_ACTION
    }

    fn tick(&self) -> u64 {
        let half = self.lifetime_secs / 2;
        self.clock.now_secs().div_ceil(half)
    }

    fn compute(&self, tick: u64, action: &str, identity: &Identity) -> String {
        let material = format!("{}|{}|{}|{}", tick, action, identity.user_id, identity.session);
        let hash = blake3::keyed_hash(&self.key, material.as_bytes());
        hex::encode(&hash.as_bytes()[..TOKEN_LEN / 2])
    }

    /// Mint a token for `action` bound to `identity`.
    pub fn issue_token(&self, action: &str, identity: &Identity) -> String {
        self.compute(self.tick(), action, identity)
    }

    /// Mint a token for the shared action.
    pub fn issue(&self, identity: &Identity) -> String {
        self.issue_token(TOKEN_ACTION, identity)
    }

    /// Check `token` against `action` for `identity`.
    pub fn verify(&self, token: &str, action: &str, identity: &Identity) -> Option<TokenAge> {
        if token.len() != TOKEN_LEN {
            return None;
        }
        let tick = self.tick();
        if constant_time_eq(token, &self.compute(tick, action, identity)) {
            return Some(TokenAge::Fresh);
        }
        if tick > 0 && constant_time_eq(token, &self.compute(tick - 1, action, identity)) {
            return Some(TokenAge::Aging);
        }
        None
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
