//! Caching policy that also tracks the expansion-file manifest.
//!
//! Applies the same caching algorithm as [`CachedPolicy`](super::CachedPolicy)
//! and additionally records up to two expansion files announced by a
//! `Licensed` response. File names and sizes persist; download URLs are only
//! kept for the current session.

use crate::clock::{Clock, SystemClock};
use crate::crypto::obfuscator::Obfuscator;
use crate::policy::cached::{load_or_default, CacheCore, FileUpdate, PolicyState};
use crate::policy::extensions::{ExtensionRegistry, FileField};
use crate::policy::Policy;
use crate::protocol::envelope::Envelope;
use crate::protocol::verdict::Verdict;
use crate::store::backend::PreferenceBackend;
use crate::store::preferences::ObfuscatedPreferences;
use crate::TollkeeperError;
use std::sync::Arc;

const SLOT_COUNT: usize = 2;
const PREF_FILE_NAME: [&str; SLOT_COUNT] = ["expansionFileName0", "expansionFileName1"];
const PREF_FILE_SIZE: [&str; SLOT_COUNT] = ["expansionFileSize0", "expansionFileSize1"];

/// Which expansion file a slot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionFileKind {
    /// Primary expansion file (wire index 1).
    Main = 0,
    /// Patch expansion file (wire index 2).
    Patch = 1,
}

/// One announced expansion file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionFileSlot {
    /// File name (persisted).
    pub name: Option<String>,
    /// Size in bytes (persisted).
    pub size_bytes: Option<u64>,
    /// Download URL (session-only).
    pub url: Option<String>,
}

/// Caching policy with an expansion-file manifest.
pub struct ManifestPolicy {
    core: CacheCore,
    slots: [ExpansionFileSlot; SLOT_COUNT],
}

impl ManifestPolicy {
    /// Key namespace of this variant.
    pub const NAMESPACE: &'static str = "tollkeeper.manifest";

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
        let mut core = CacheCore::load(prefs, clock, ExtensionRegistry::MANIFEST);

        let mut slots: [ExpansionFileSlot; SLOT_COUNT] = Default::default();
        for (index, slot) in slots.iter_mut().enumerate() {
            let name = core.prefs().get_string(PREF_FILE_NAME[index], "");
            slot.name = (!name.is_empty()).then_some(name);

            let mut diagnostics = Vec::new();
            let size = load_or_default(core.prefs(), PREF_FILE_SIZE[index], -1i64, &mut diagnostics);
            core.diagnostics_mut().append(&mut diagnostics);
            slot.size_bytes = u64::try_from(size).ok();
        }

        Self { core, slots }
    }

    /// Forget everything, including both expansion slots.
    pub fn reset_policy(&mut self) {
        self.core.reset();
        self.slots = Default::default();
        self.buffer_slots();
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

    /// The slot describing `kind`.
    pub fn expansion_slot(&self, kind: ExpansionFileKind) -> &ExpansionFileSlot {
        &self.slots[kind as usize]
    }

    /// Number of URL slots in use: one past the highest slot with a URL.
    pub fn expansion_url_count(&self) -> usize {
        self.slots
            .iter()
            .rposition(|slot| slot.url.is_some())
            .map_or(0, |index| index + 1)
    }

    /// Download URL of slot `index`, if announced this session.
    pub fn expansion_url(&self, index: usize) -> Option<&str> {
        self.slots.get(index)?.url.as_deref()
    }

    /// File name of slot `index`.
    pub fn expansion_file_name(&self, index: usize) -> Option<&str> {
        self.slots.get(index)?.name.as_deref()
    }

    /// File size of slot `index`.
    pub fn expansion_file_size(&self, index: usize) -> Option<u64> {
        self.slots.get(index)?.size_bytes
    }

    fn apply_file_update(&mut self, update: FileUpdate) {
        let Some(slot) = self.slots.get_mut(update.slot) else {
            return;
        };

        match update.field {
            // An empty value reads back as absent after a restart.
            FileField::Name => slot.name = (!update.value.is_empty()).then_some(update.value),
            FileField::Url => slot.url = (!update.value.is_empty()).then_some(update.value),
            FileField::Size => match update.value.parse::<u64>() {
                Ok(size) => slot.size_bytes = Some(size),
                Err(_) => {
                    tracing::warn!(
                        slot = update.slot,
                        value = %update.value,
                        "Ignoring unparseable expansion file size"
                    );
                }
            },
        }
    }

    fn buffer_slots(&mut self) {
        for index in 0..SLOT_COUNT {
            let name = self.slots[index].name.clone().unwrap_or_default();
            let size = self.slots[index]
                .size_bytes
                .and_then(|size| i64::try_from(size).ok())
                .unwrap_or(-1);

            let prefs = self.core.prefs_mut();
            prefs.put_string(PREF_FILE_NAME[index], &name);
            prefs.put_value(PREF_FILE_SIZE[index], size);
        }
    }
}

impl Policy for ManifestPolicy {
    fn allow_access(&self) -> bool {
        self.core.allow_access()
    }

    fn process_server_response(&mut self, verdict: Verdict, envelope: Option<&Envelope>) {
        for update in self.core.apply_verdict(verdict, envelope) {
            self.apply_file_update(update);
        }
        self.buffer_slots();
        self.core.persist();
    }
}
