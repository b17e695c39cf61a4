//! Route-level cooldown with escalating backoff
//!
//! Stops the scheduler from re-trying a failing route every cycle. A route
//! that keeps failing escalates from a short suppression to the cap, and a
//! route that sits at the cap repeatedly without a single success gets
//! blacklisted for the session: divergences that never survive simulation
//! are usually an artifact of one venue's quoting, not a real edge.
//!
//! Keys are route signatures ("USDC>orca:SOL>raydium:USDC"), so the same
//! asset loop through different venues cools down independently. Backed by
//! a `DashMap` so the table can be read concurrently with cycle recording.

use dashmap::DashMap;
use tracing::{debug, info};

/// Escalation multiplier per consecutive failure.
const ESCALATION_FACTOR: u64 = 5;

/// Cooldown cap in cycles. At a 5s cycle interval this is an hour.
const DEFAULT_MAX_COOLDOWN: u64 = 720;

struct CooldownEntry {
    last_failed_cycle: u64,
    cooldown_cycles: u64,
    failure_count: u32,
    success_count: u32,
    /// Times this route has sat at the cooldown cap.
    capped_cycles: u32,
    /// Permanently suppressed for the session.
    blacklisted: bool,
}

/// Per-route failure tracker with escalating backoff and a session
/// blacklist for structural false positives.
pub struct RouteCooldown {
    entries: DashMap<String, CooldownEntry>,
    initial_cooldown: u64,
    max_cooldown: u64,
    /// Cap visits with zero successes before permanent suppression.
    /// 0 disables blacklisting.
    max_strikes: u32,
}

impl RouteCooldown {
    /// `initial_cooldown` is the suppression after a first failure, in
    /// cycles; 0 disables the tracker entirely.
    pub fn new(initial_cooldown: u64, max_strikes: u32) -> Self {
        Self {
            entries: DashMap::new(),
            initial_cooldown,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
            max_strikes,
        }
    }

    /// True while the route is suppressed at the given cycle.
    pub fn is_cooled_down(&self, signature: &str, current_cycle: u64) -> bool {
        if self.initial_cooldown == 0 {
            return false;
        }
        if let Some(entry) = self.entries.get(signature) {
            entry.blacklisted
                || current_cycle < entry.last_failed_cycle + entry.cooldown_cycles
        } else {
            false
        }
    }

    /// Record a failed attempt, creating or escalating the suppression:
    /// initial, then x5 per failure, capped. Enough cap visits with zero
    /// successes blacklists the route for the session.
    pub fn record_failure(&self, signature: &str, cycle: u64) {
        if self.initial_cooldown == 0 {
            return;
        }

        let mut entry = self
            .entries
            .entry(signature.to_string())
            .or_insert_with(|| CooldownEntry {
                last_failed_cycle: cycle,
                cooldown_cycles: 0,
                failure_count: 0,
                success_count: 0,
                capped_cycles: 0,
                blacklisted: false,
            });

        if entry.blacklisted {
            return;
        }

        entry.failure_count += 1;
        entry.last_failed_cycle = cycle;

        let escalated = self.initial_cooldown.saturating_mul(
            ESCALATION_FACTOR.saturating_pow(entry.failure_count.saturating_sub(1)),
        );
        let new_cooldown = escalated.min(self.max_cooldown);
        if new_cooldown == self.max_cooldown {
            entry.capped_cycles += 1;
        }
        entry.cooldown_cycles = new_cooldown;

        if self.max_strikes > 0
            && entry.capped_cycles >= self.max_strikes
            && entry.success_count == 0
        {
            entry.blacklisted = true;
            info!(
                route = signature,
                failures = entry.failure_count,
                cap_visits = entry.capped_cycles,
                "Route blacklisted for the session"
            );
            return;
        }

        debug!(
            route = signature,
            failure = entry.failure_count,
            cooldown_cycles = entry.cooldown_cycles,
            "Route cooling down"
        );
    }

    /// A success wipes the route's history, including a blacklist entry.
    pub fn record_success(&self, signature: &str) {
        if let Some((_, entry)) = self.entries.remove(signature) {
            if entry.blacklisted {
                info!(route = signature, "Route un-blacklisted after success");
            } else {
                debug!(route = signature, "Route cooldown reset after success");
            }
        }
    }

    /// Drop expired entries to bound memory. Blacklisted routes stay.
    pub fn cleanup(&self, current_cycle: u64) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.blacklisted || current_cycle < entry.last_failed_cycle + entry.cooldown_cycles
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Expired route cooldowns cleaned up");
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.blacklisted).count()
    }

    pub fn blacklist_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.blacklisted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOL_LOOP: &str = "USDC>orca:SOL>raydium:USDC";
    const ETH_LOOP: &str = "USDC>orca:ETH>raydium:USDC";

    #[test]
    fn test_unknown_route_is_not_cooled_down() {
        let cd = RouteCooldown::new(2, 3);
        assert!(!cd.is_cooled_down(SOL_LOOP, 100));
    }

    #[test]
    fn test_cooldown_window_after_first_failure() {
        let cd = RouteCooldown::new(2, 3);
        cd.record_failure(SOL_LOOP, 100);

        assert!(cd.is_cooled_down(SOL_LOOP, 100));
        assert!(cd.is_cooled_down(SOL_LOOP, 101));
        assert!(!cd.is_cooled_down(SOL_LOOP, 102));
    }

    #[test]
    fn test_backoff_escalates_by_factor_five() {
        let cd = RouteCooldown::new(2, 0);

        // Failure 1: 2 cycles
        cd.record_failure(SOL_LOOP, 100);
        assert!(!cd.is_cooled_down(SOL_LOOP, 102));

        // Failure 2: 10 cycles
        cd.record_failure(SOL_LOOP, 200);
        assert!(cd.is_cooled_down(SOL_LOOP, 209));
        assert!(!cd.is_cooled_down(SOL_LOOP, 210));

        // Failure 3: 50 cycles
        cd.record_failure(SOL_LOOP, 300);
        assert!(cd.is_cooled_down(SOL_LOOP, 349));
        assert!(!cd.is_cooled_down(SOL_LOOP, 350));

        // Failure 4: 250 cycles
        cd.record_failure(SOL_LOOP, 400);
        assert!(cd.is_cooled_down(SOL_LOOP, 649));
        assert!(!cd.is_cooled_down(SOL_LOOP, 650));

        // Failure 5: capped at 720
        cd.record_failure(SOL_LOOP, 1000);
        assert!(cd.is_cooled_down(SOL_LOOP, 1719));
        assert!(!cd.is_cooled_down(SOL_LOOP, 1720));
    }

    #[test]
    fn test_success_resets_instantly() {
        let cd = RouteCooldown::new(2, 3);
        cd.record_failure(SOL_LOOP, 100);
        assert!(cd.is_cooled_down(SOL_LOOP, 101));

        cd.record_success(SOL_LOOP);
        assert!(!cd.is_cooled_down(SOL_LOOP, 101));
        assert_eq!(cd.active_count(), 0);
    }

    #[test]
    fn test_routes_cool_down_independently() {
        let cd = RouteCooldown::new(2, 3);
        cd.record_failure(SOL_LOOP, 100);

        assert!(cd.is_cooled_down(SOL_LOOP, 101));
        assert!(!cd.is_cooled_down(ETH_LOOP, 101));
    }

    #[test]
    fn test_zero_initial_cooldown_disables_tracking() {
        let cd = RouteCooldown::new(0, 3);
        cd.record_failure(SOL_LOOP, 100);
        assert!(!cd.is_cooled_down(SOL_LOOP, 100));
        assert_eq!(cd.active_count(), 0);
    }

    #[test]
    fn test_cleanup_drops_only_expired_entries() {
        let cd = RouteCooldown::new(2, 3);
        cd.record_failure(SOL_LOOP, 100); // expires at 102
        cd.record_failure(ETH_LOOP, 200); // expires at 202
        assert_eq!(cd.active_count(), 2);

        cd.cleanup(103);
        assert_eq!(cd.active_count(), 1);

        cd.cleanup(203);
        assert_eq!(cd.active_count(), 0);
    }

    #[test]
    fn test_blacklist_after_repeated_cap_visits() {
        let cd = RouteCooldown::new(2, 3);

        // Escalate to the cap: 2, 10, 50, 250, 720 (cap visit 1)
        for cycle in [100, 200, 300, 400, 1500] {
            cd.record_failure(SOL_LOOP, cycle);
        }
        assert_eq!(cd.blacklist_count(), 0);

        cd.record_failure(SOL_LOOP, 3000); // cap visit 2
        assert_eq!(cd.blacklist_count(), 0);

        cd.record_failure(SOL_LOOP, 5000); // cap visit 3, blacklisted
        assert_eq!(cd.blacklist_count(), 1);
        assert!(cd.is_cooled_down(SOL_LOOP, 999_999));

        // Further failures are no-ops once blacklisted.
        cd.record_failure(SOL_LOOP, 1_000_000);
        assert_eq!(cd.blacklist_count(), 1);
    }

    #[test]
    fn test_blacklist_survives_cleanup() {
        let cd = RouteCooldown::new(2, 1);
        for cycle in [100, 200, 300, 400, 1500] {
            cd.record_failure(SOL_LOOP, cycle);
        }
        assert_eq!(cd.blacklist_count(), 1);

        cd.cleanup(999_999_999);
        assert_eq!(cd.blacklist_count(), 1);
        assert!(cd.is_cooled_down(SOL_LOOP, 999_999_999));
    }

    #[test]
    fn test_blacklist_disabled_with_zero_strikes() {
        let cd = RouteCooldown::new(2, 0);
        for i in 0..20u64 {
            cd.record_failure(SOL_LOOP, i * 2000);
        }
        assert_eq!(cd.blacklist_count(), 0);
    }

    #[test]
    fn test_success_lifts_a_blacklist() {
        let cd = RouteCooldown::new(2, 1);
        for cycle in [100, 200, 300, 400, 1500] {
            cd.record_failure(SOL_LOOP, cycle);
        }
        assert_eq!(cd.blacklist_count(), 1);

        cd.record_success(SOL_LOOP);
        assert_eq!(cd.blacklist_count(), 0);
        assert!(!cd.is_cooled_down(SOL_LOOP, 999_999));
    }
}
