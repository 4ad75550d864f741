//! Caching policy.
//!
//! Trusts a `Licensed` verdict until the authority-supplied validity
//! timestamp, and tolerates `Retry` verdicts inside a grace window or up to a
//! retry budget, but only within one minute of the last contact attempt.
//!
//! State survives restarts through [`ObfuscatedPreferences`]; the time of the
//! last verdict is session-only.

use crate::clock::{Clock, SystemClock};
use crate::crypto::obfuscator::Obfuscator;
use crate::policy::extensions::{ExtensionRegistry, ExtensionTarget, FileField};
use crate::policy::{Policy, MILLIS_PER_MINUTE};
use crate::protocol::envelope::Envelope;
use crate::protocol::extras::ExtensionMap;
use crate::protocol::verdict::Verdict;
use crate::store::backend::PreferenceBackend;
use crate::store::preferences::ObfuscatedPreferences;
use crate::TollkeeperError;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) const PREF_LAST_VERDICT: &str = "lastResponse";
pub(crate) const PREF_VALID_UNTIL: &str = "validityTimestamp";
pub(crate) const PREF_RETRY_GRACE_UNTIL: &str = "retryUntil";
pub(crate) const PREF_MAX_RETRIES: &str = "maxRetries";
pub(crate) const PREF_RETRY_COUNT: &str = "retryCount";

/// Decision state of a caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyState {
    /// Most recent verdict.
    pub last_verdict: Verdict,
    /// When the most recent verdict was processed (session-only).
    pub last_verdict_time_ms: i64,
    /// Cached `Licensed` verdicts are trusted until this instant.
    pub valid_until_ms: i64,
    /// Cached `Retry` verdicts are tolerated until this instant.
    pub retry_grace_until_ms: i64,
    /// Consecutive `Retry` verdicts tolerated.
    pub max_ignorable_retries: i64,
    /// Consecutive `Retry` verdicts seen so far.
    pub consecutive_retry_count: i64,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self {
            last_verdict: Verdict::Retry,
            last_verdict_time_ms: 0,
            valid_until_ms: 0,
            retry_grace_until_ms: 0,
            max_ignorable_retries: 0,
            consecutive_retry_count: 0,
        }
    }
}

/// A file-slot extension to apply after the shared algorithm has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileUpdate {
    pub field: FileField,
    pub slot: usize,
    pub value: String,
}

/// Read a persisted value, recording schema violations instead of failing.
pub(crate) fn load_or_default<T: FromStr + Copy>(
    prefs: &ObfuscatedPreferences,
    key: &str,
    default: T,
    diagnostics: &mut Vec<TollkeeperError>,
) -> T {
    match prefs.get_value(key, default) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(
                namespace = prefs.namespace(),
                key,
                error = %e,
                "Stored policy value has the wrong type; using default"
            );
            diagnostics.push(e);
            default
        }
    }
}

/// State, storage and algorithm shared by the caching variants.
pub(crate) struct CacheCore {
    prefs: ObfuscatedPreferences,
    clock: Arc<dyn Clock>,
    registry: ExtensionRegistry,
    state: PolicyState,
    diagnostics: Vec<TollkeeperError>,
}

impl CacheCore {
    pub(crate) fn load(
        prefs: ObfuscatedPreferences,
        clock: Arc<dyn Clock>,
        registry: ExtensionRegistry,
    ) -> Self {
        let mut diagnostics = Vec::new();
        let defaults = PolicyState::default();

        let state = PolicyState {
            last_verdict: load_or_default(
                &prefs,
                PREF_LAST_VERDICT,
                defaults.last_verdict,
                &mut diagnostics,
            ),
            last_verdict_time_ms: 0,
            valid_until_ms: load_or_default(
                &prefs,
                PREF_VALID_UNTIL,
                defaults.valid_until_ms,
                &mut diagnostics,
            ),
            retry_grace_until_ms: load_or_default(
                &prefs,
                PREF_RETRY_GRACE_UNTIL,
                defaults.retry_grace_until_ms,
                &mut diagnostics,
            ),
            max_ignorable_retries: load_or_default(
                &prefs,
                PREF_MAX_RETRIES,
                defaults.max_ignorable_retries,
                &mut diagnostics,
            ),
            consecutive_retry_count: load_or_default(
                &prefs,
                PREF_RETRY_COUNT,
                defaults.consecutive_retry_count,
                &mut diagnostics,
            ),
        };

        Self {
            prefs,
            clock,
            registry,
            state,
            diagnostics,
        }
    }

    pub(crate) fn state(&self) -> &PolicyState {
        &self.state
    }

    pub(crate) fn prefs(&self) -> &ObfuscatedPreferences {
        &self.prefs
    }

    pub(crate) fn prefs_mut(&mut self) -> &mut ObfuscatedPreferences {
        &mut self.prefs
    }

    pub(crate) fn diagnostics(&self) -> &[TollkeeperError] {
        &self.diagnostics
    }

    pub(crate) fn diagnostics_mut(&mut self) -> &mut Vec<TollkeeperError> {
        &mut self.diagnostics
    }

    pub(crate) fn allow_access(&self) -> bool {
        let now = self.clock.now_millis();
        let state = &self.state;

        match state.last_verdict {
            Verdict::Licensed => now <= state.valid_until_ms,
            Verdict::Retry
                if now < state.last_verdict_time_ms.saturating_add(MILLIS_PER_MINUTE) =>
            {
                now <= state.retry_grace_until_ms
                    || state.consecutive_retry_count <= state.max_ignorable_retries
            }
            _ => false,
        }
    }

    /// Update in-memory state for a verdict. Nothing is persisted yet; file
    /// slot extensions are returned for the caller to apply.
    pub(crate) fn apply_verdict(
        &mut self,
        verdict: Verdict,
        envelope: Option<&Envelope>,
    ) -> Vec<FileUpdate> {
        let now = self.clock.now_millis();
        let mut file_updates = Vec::new();

        self.state.consecutive_retry_count = match verdict {
            Verdict::Retry => self.state.consecutive_retry_count.saturating_add(1),
            _ => 0,
        };

        match verdict {
            Verdict::Licensed => {
                let extras = envelope.map(Envelope::extras).unwrap_or_default();
                file_updates = self.apply_extensions(&extras, now);
            }
            Verdict::NotLicensed => {
                self.state.valid_until_ms = 0;
                self.state.retry_grace_until_ms = 0;
                self.state.max_ignorable_retries = 0;
            }
            Verdict::Retry => {}
        }

        self.state.last_verdict = verdict;
        self.state.last_verdict_time_ms = now;

        tracing::debug!(
            namespace = self.prefs.namespace(),
            ?verdict,
            valid_until_ms = self.state.valid_until_ms,
            retry_grace_until_ms = self.state.retry_grace_until_ms,
            max_ignorable_retries = self.state.max_ignorable_retries,
            consecutive_retry_count = self.state.consecutive_retry_count,
            "Processed server verdict"
        );

        file_updates
    }

    fn apply_extensions(&mut self, extras: &ExtensionMap, now: i64) -> Vec<FileUpdate> {
        // A missing VT leaves a one-minute window; missing GT/GR disable grace.
        self.state.valid_until_ms = now.saturating_add(MILLIS_PER_MINUTE);
        self.state.retry_grace_until_ms = 0;
        self.state.max_ignorable_retries = 0;

        let mut file_updates = Vec::new();
        for (key, value) in extras.iter() {
            let target = match self.registry.resolve(key) {
                Ok(Some(target)) => target,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring extension");
                    continue;
                }
            };

            match target {
                ExtensionTarget::ValidUntil => match value.parse::<i64>() {
                    Ok(ts) => self.state.valid_until_ms = ts,
                    Err(_) => {
                        tracing::warn!(value, "Unparseable VT; keeping one-minute validity");
                    }
                },
                ExtensionTarget::RetryGraceUntil => {
                    self.state.retry_grace_until_ms = value.parse().unwrap_or(0);
                }
                ExtensionTarget::MaxIgnorableRetries => {
                    self.state.max_ignorable_retries = value.parse().unwrap_or(0);
                }
                ExtensionTarget::File { field, slot } => file_updates.push(FileUpdate {
                    field,
                    slot,
                    value: value.to_string(),
                }),
            }
        }
        file_updates
    }

    /// Reset every field to its default.
    pub(crate) fn reset(&mut self) {
        self.state = PolicyState::default();
    }

    /// Buffer the persisted fields and commit everything buffered so far.
    pub(crate) fn persist(&mut self) {
        let state = self.state;
        self.prefs.put_value(PREF_LAST_VERDICT, state.last_verdict);
        self.prefs.put_value(PREF_VALID_UNTIL, state.valid_until_ms);
        self.prefs
            .put_value(PREF_RETRY_GRACE_UNTIL, state.retry_grace_until_ms);
        self.prefs.put_value(PREF_MAX_RETRIES, state.max_ignorable_retries);
        self.prefs
            .put_value(PREF_RETRY_COUNT, state.consecutive_retry_count);

        if let Err(e) = self.prefs.commit() {
            tracing::error!(
                namespace = self.prefs.namespace(),
                error = %e,
                "Failed to commit policy state; keeping in-memory state"
            );
        }
    }
}

/// Caching policy backed by obfuscated preferences.
pub struct CachedPolicy {
    core: CacheCore,
}

impl CachedPolicy {
    /// Key namespace of this variant.
    pub const NAMESPACE: &'static str = "tollkeeper.cached";

    /// Load the policy from `backend` using the system clock.
    pub fn new(backend: Box<dyn PreferenceBackend>, obfuscator: Arc<dyn Obfuscator>) -> Self {
        Self::with_clock(backend, obfuscator, Arc::new(SystemClock))
    }

    /// Load the policy with an explicit clock.
    pub fn with_clock(
        backend: Box<dyn PreferenceBackend>,
        obfuscator: Arc<dyn Obfuscator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prefs = ObfuscatedPreferences::new(Self::NAMESPACE, backend, obfuscator);
        Self {
            core: CacheCore::load(prefs, clock, ExtensionRegistry::CACHED),
        }
    }

    /// Forget everything: defaults everywhere and `Retry` as the last verdict.
    pub fn reset_policy(&mut self) {
        self.core.reset();
        self.core.persist();
    }

    /// Current decision state.
    pub fn state(&self) -> &PolicyState {
        self.core.state()
    }

    /// Schema violations found while loading persisted state.
    pub fn load_diagnostics(&self) -> &[TollkeeperError] {
        self.core.diagnostics()
    }

    /// Most recent verdict.
    pub fn last_verdict(&self) -> Verdict {
        self.state().last_verdict
    }

    /// End of the cached-grant validity window.
    pub fn valid_until_ms(&self) -> i64 {
        self.state().valid_until_ms
    }

    /// End of the retry grace window.
    pub fn retry_grace_until_ms(&self) -> i64 {
        self.state().retry_grace_until_ms
    }

    /// Consecutive retries tolerated.
    pub fn max_ignorable_retries(&self) -> i64 {
        self.state().max_ignorable_retries
    }

    /// Consecutive retries seen.
    pub fn consecutive_retry_count(&self) -> i64 {
        self.state().consecutive_retry_count
    }
}

impl Policy for CachedPolicy {
    fn allow_access(&self) -> bool {
        self.core.allow_access()
    }

    fn process_server_response(&mut self, verdict: Verdict, envelope: Option<&Envelope>) {
        // The cached registry resolves no file keys.
        let _ = self.core.apply_verdict(verdict, envelope);
        self.core.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::crypto::obfuscator::BoundObfuscator;
    use crate::store::backend::MemoryBackend;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory backend whose commit can be made to fail.
    #[derive(Clone, Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        failing: Arc<AtomicBool>,
    }

    impl FlakyBackend {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl PreferenceBackend for FlakyBackend {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: String) {
            self.inner.set(key, value);
        }

        fn commit(&mut self) -> Result<(), TollkeeperError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TollkeeperError::StoreIO("disk full".to_string()));
            }
            self.inner.commit()
        }
    }

    fn obfuscator() -> Arc<dyn Obfuscator> {
        Arc::new(BoundObfuscator::new(b"policy-salt", "com.example.app", "device-1"))
    }

    fn policy(backend: &MemoryBackend, clock: &MockClock) -> CachedPolicy {
        CachedPolicy::with_clock(
            Box::new(backend.clone()),
            obfuscator(),
            Arc::new(clock.clone()),
        )
    }

    fn licensed(extras: &str) -> Envelope {
        Envelope::parse(&format!("0|1|com.example.app|7|user|0:{}", extras)).unwrap()
    }

    #[test]
    fn test_fresh_policy_defaults() {
        let clock = MockClock::from_millis(1_000);
        let policy = policy(&MemoryBackend::new(), &clock);

        assert_eq!(*policy.state(), PolicyState::default());
        assert_eq!(policy.last_verdict(), Verdict::Retry);
        assert!(policy.load_diagnostics().is_empty());
    }

    #[test]
    fn test_fresh_policy_denies_after_first_minute() {
        // last_verdict_time is 0 at startup, so a persisted Retry grants
        // nothing once the clock is past the first minute of the epoch.
        let clock = MockClock::from_millis(10 * MILLIS_PER_MINUTE);
        let policy = policy(&MemoryBackend::new(), &clock);
        assert!(!policy.allow_access());
    }

    #[test]
    fn test_licensed_applies_extensions() {
        let clock = MockClock::from_millis(0);
        let mut policy = policy(&MemoryBackend::new(), &clock);

        policy.process_server_response(Verdict::Licensed, Some(&licensed("VT=11&GT=22&GR=33")));

        assert_eq!(policy.valid_until_ms(), 11);
        assert_eq!(policy.retry_grace_until_ms(), 22);
        assert_eq!(policy.max_ignorable_retries(), 33);
        assert!(policy.allow_access());

        clock.set_millis(11);
        assert!(policy.allow_access());
        clock.set_millis(12);
        assert!(!policy.allow_access());
    }

    #[test]
    fn test_licensed_without_extras_gets_one_minute() {
        let clock = MockClock::from_millis(5_000);
        let mut policy = policy(&MemoryBackend::new(), &clock);

        policy.process_server_response(Verdict::Licensed, None);

        assert_eq!(policy.valid_until_ms(), 5_000 + MILLIS_PER_MINUTE);
        assert_eq!(policy.retry_grace_until_ms(), 0);
        assert_eq!(policy.max_ignorable_retries(), 0);
        clock.advance(chrono::Duration::milliseconds(MILLIS_PER_MINUTE));
        assert!(policy.allow_access());
        clock.advance(chrono::Duration::milliseconds(1));
        assert!(!policy.allow_access());
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let clock = MockClock::from_millis(1_000);
        let mut policy = policy(&MemoryBackend::new(), &clock);

        policy.process_server_response(Verdict::Licensed, Some(&licensed("VT=9&GT=99&GR=9")));
        policy.process_server_response(
            Verdict::Licensed,
            Some(&licensed("VT=soon&GT=later&GR=many")),
        );

        assert_eq!(policy.valid_until_ms(), 1_000 + MILLIS_PER_MINUTE);
        assert_eq!(policy.retry_grace_until_ms(), 0);
        assert_eq!(policy.max_ignorable_retries(), 0);
    }

    #[test]
    fn test_malformed_extras_treated_as_empty() {
        let clock = MockClock::from_millis(1_000);
        let mut policy = policy(&MemoryBackend::new(), &clock);

        policy.process_server_response(Verdict::Licensed, Some(&licensed("VT=%zz&GT=5&GR=5")));

        assert_eq!(policy.valid_until_ms(), 1_000 + MILLIS_PER_MINUTE);
        assert_eq!(policy.retry_grace_until_ms(), 0);
        assert_eq!(policy.max_ignorable_retries(), 0);
    }

    #[test]
    fn test_not_licensed_clears_windows() {
        let clock = MockClock::from_millis(0);
        let mut policy = policy(&MemoryBackend::new(), &clock);

        policy.process_server_response(Verdict::Licensed, Some(&licensed("VT=11&GT=22&GR=33")));
        policy.process_server_response(Verdict::NotLicensed, None);

        assert_eq!(policy.valid_until_ms(), 0);
        assert_eq!(policy.retry_grace_until_ms(), 0);
        assert_eq!(policy.max_ignorable_retries(), 0);
        assert!(!policy.allow_access());
    }

    #[test]
    fn test_retry_keeps_windows_and_counts() {
        let clock = MockClock::from_millis(0);
        let mut policy = policy(&MemoryBackend::new(), &clock);

        policy.process_server_response(
            Verdict::Licensed,
            Some(&licensed("VT=100&GT=200&GR=2")),
        );
        for expected in 1..=3 {
            policy.process_server_response(Verdict::Retry, None);
            assert_eq!(policy.consecutive_retry_count(), expected);
        }

        assert_eq!(policy.valid_until_ms(), 100);
        assert_eq!(policy.retry_grace_until_ms(), 200);
        assert_eq!(policy.max_ignorable_retries(), 2);

        policy.process_server_response(Verdict::NotLicensed, None);
        assert_eq!(policy.consecutive_retry_count(), 0);
    }

    #[test]
    fn test_retry_allowed_inside_grace_window() {
        let clock = MockClock::from_millis(0);
        let mut policy = policy(&MemoryBackend::new(), &clock);
        policy.process_server_response(
            Verdict::Licensed,
            Some(&licensed("VT=10&GT=100000&GR=0")),
        );

        clock.set_millis(50_000);
        policy.process_server_response(Verdict::Retry, None);
        assert_eq!(policy.consecutive_retry_count(), 1);
        assert!(policy.allow_access());

        // Still inside GT, but a minute has passed since the last contact.
        clock.set_millis(50_000 + MILLIS_PER_MINUTE);
        assert!(!policy.allow_access());
    }

    #[test]
    fn test_retry_window_boundaries() {
        let clock = MockClock::from_millis(0);
        let mut policy = policy(&MemoryBackend::new(), &clock);
        policy.process_server_response(
            Verdict::Licensed,
            Some(&licensed("VT=10&GT=70000&GR=0")),
        );

        clock.set_millis(20_000);
        policy.process_server_response(Verdict::Retry, None);

        // Retry budget is exhausted, so only the grace window applies.
        clock.set_millis(70_000);
        assert!(policy.allow_access());
        clock.set_millis(70_001);
        assert!(!policy.allow_access());

        policy.process_server_response(
            Verdict::Licensed,
            Some(&licensed("VT=10&GT=999999&GR=0")),
        );
        clock.set_millis(100_000);
        policy.process_server_response(Verdict::Retry, None);

        clock.set_millis(100_000 + MILLIS_PER_MINUTE - 1);
        assert!(policy.allow_access());
        clock.set_millis(100_000 + MILLIS_PER_MINUTE);
        assert!(!policy.allow_access());
    }

    #[test]
    fn test_retry_allowed_by_retry_budget() {
        let clock = MockClock::from_millis(0);
        let mut policy = policy(&MemoryBackend::new(), &clock);
        policy.process_server_response(Verdict::Licensed, Some(&licensed("VT=10&GT=0&GR=2")));

        clock.set_millis(1_000);
        policy.process_server_response(Verdict::Retry, None);
        assert!(policy.allow_access());
        policy.process_server_response(Verdict::Retry, None);
        assert!(policy.allow_access());
        policy.process_server_response(Verdict::Retry, None);
        assert!(!policy.allow_access());
    }

    #[test]
    fn test_state_persists_across_instances() {
        let backend = MemoryBackend::new();
        let clock = MockClock::from_millis(0);
        {
            let mut first = policy(&backend, &clock);
            first.process_server_response(
                Verdict::Licensed,
                Some(&licensed("VT=500000&GT=22&GR=33")),
            );
            first.process_server_response(Verdict::Retry, None);
        }

        let second = policy(&backend, &clock);
        assert_eq!(second.last_verdict(), Verdict::Retry);
        assert_eq!(second.valid_until_ms(), 500_000);
        assert_eq!(second.retry_grace_until_ms(), 22);
        assert_eq!(second.max_ignorable_retries(), 33);
        assert_eq!(second.consecutive_retry_count(), 1);
        assert_eq!(second.state().last_verdict_time_ms, 0);
    }

    #[test]
    fn test_persisted_licensed_grant_survives_restart() {
        let backend = MemoryBackend::new();
        let clock = MockClock::from_millis(1_000);
        policy(&backend, &clock)
            .process_server_response(Verdict::Licensed, Some(&licensed("VT=90000")));

        clock.set_millis(80_000);
        assert!(policy(&backend, &clock).allow_access());
    }

    #[test]
    fn test_tampered_storage_loads_defaults() {
        let backend = MemoryBackend::new();
        let clock = MockClock::from_millis(0);
        policy(&backend, &clock)
            .process_server_response(Verdict::Licensed, Some(&licensed("VT=999999")));

        for key in backend.snapshot().keys() {
            backend.overwrite(key, "Zm9yZ2VkIGxpY2Vuc2UgdmFsdWUgaGVyZQ==");
        }

        let reloaded = policy(&backend, &clock);
        assert_eq!(*reloaded.state(), PolicyState::default());
        assert!(!reloaded.allow_access());
        assert!(reloaded.load_diagnostics().is_empty());
    }

    #[test]
    fn test_failed_commit_keeps_memory_state_and_recovers() {
        let backend = FlakyBackend::default();
        let clock = MockClock::from_millis(0);
        let load = |backend: &FlakyBackend| {
            CachedPolicy::with_clock(
                Box::new(backend.clone()),
                obfuscator(),
                Arc::new(clock.clone()),
            )
        };

        let mut active = load(&backend);
        backend.set_failing(true);
        active.process_server_response(Verdict::Licensed, Some(&licensed("VT=100&GT=5&GR=6")));

        assert!(active.allow_access());
        assert_eq!(active.valid_until_ms(), 100);
        assert!(backend.inner.snapshot().is_empty());

        backend.set_failing(false);
        active.process_server_response(Verdict::Retry, None);

        let reloaded = load(&backend);
        assert_eq!(reloaded.last_verdict(), Verdict::Retry);
        assert_eq!(reloaded.valid_until_ms(), 100);
        assert_eq!(reloaded.retry_grace_until_ms(), 5);
        assert_eq!(reloaded.max_ignorable_retries(), 6);
        assert_eq!(reloaded.consecutive_retry_count(), 1);
    }

    #[test]
    fn test_type_mismatch_recorded_as_diagnostic() {
        let backend = MemoryBackend::new();
        let clock = MockClock::from_millis(0);
        {
            let mut prefs = ObfuscatedPreferences::new(
                CachedPolicy::NAMESPACE,
                Box::new(backend.clone()),
                obfuscator(),
            );
            prefs.put_string(PREF_VALID_UNTIL, "tomorrow");
            prefs.put_string(PREF_LAST_VERDICT, "LICENSED");
            prefs.commit().unwrap();
        }

        let loaded = policy(&backend, &clock);
        assert_eq!(loaded.valid_until_ms(), 0);
        assert_eq!(loaded.last_verdict(), Verdict::Retry);
        assert_eq!(loaded.load_diagnostics().len(), 2);
        assert!(loaded
            .load_diagnostics()
            .iter()
            .all(|e| matches!(e, TollkeeperError::TypeMismatch { .. })));
    }

    #[test]
    fn test_reset_policy() {
        let backend = MemoryBackend::new();
        let clock = MockClock::from_millis(0);
        let mut active = policy(&backend, &clock);
        active.process_server_response(Verdict::Licensed, Some(&licensed("VT=11&GT=22&GR=33")));

        active.reset_policy();
        assert_eq!(*active.state(), PolicyState::default());
        assert_eq!(active.last_verdict(), Verdict::Retry);

        let reloaded = policy(&backend, &clock);
        assert_eq!(*reloaded.state(), PolicyState::default());
    }
}
