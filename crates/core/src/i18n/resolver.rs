use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use mnemo_backend::{StaticTranslations, TranslationProvider};

use crate::config::MnemoCfg;
use crate::i18n::builtin;
use crate::i18n::catalog::ResourceCatalog;
use crate::i18n::fallback::{self, Replacements};
use crate::i18n::locale;
use crate::settings::{LANGUAGE_OVERRIDE, SettingsStore};
use crate::types::{ActiveResolutionState, Coverage, ResourceSet, ResourceVariant};

/// Materializes one active variant at a time and answers synchronous lookups.
///
/// Every switch is stamped with a sequence number when it starts. A switch
/// only commits if no newer switch was issued meanwhile, so a slow older load
/// can never overwrite a newer one regardless of completion order.
pub struct ResourceResolver {
    catalog: ResourceCatalog,
    provider: Arc<dyn TranslationProvider>,
    statics: Arc<dyn StaticTranslations>,
    locations: Vec<String>,
    settings: Arc<dyn SettingsStore>,
    default_code: String,
    hint: Option<String>,
    builtin: ResourceSet,
    state: RwLock<Arc<ActiveResolutionState>>,
    variants: RwLock<Vec<ResourceVariant>>,
    issued: AtomicU64,
}

impl ResourceResolver {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        statics: Arc<dyn StaticTranslations>,
        settings: Arc<dyn SettingsStore>,
        cfg: &MnemoCfg,
        hint: Option<String>,
    ) -> Self {
        let builtin = builtin::base();
        let initial = ActiveResolutionState {
            active_variant: cfg.default_language.clone(),
            override_variant: String::new(),
            default_set: builtin.clone(),
            active_set: builtin.clone(),
            coverage: Coverage::complete(builtin.len()),
            sequence: 0,
        };
        Self {
            catalog: ResourceCatalog::new(
                provider.clone(),
                statics.clone(),
                cfg.static_locations.clone(),
                cfg.default_language.clone(),
            ),
            provider,
            statics,
            locations: cfg.static_locations.clone(),
            settings,
            default_code: cfg.default_language.clone(),
            hint,
            builtin,
            state: RwLock::new(Arc::new(initial)),
            variants: RwLock::new(Vec::new()),
            issued: AtomicU64::new(0),
        }
    }

    /// Discover variants, then activate the persisted override or the hint.
    pub async fn initialize(&self) -> Arc<ActiveResolutionState> {
        let variants = self.catalog.discover().await;
        tracing::info!(count = variants.len(), "variants discovered");
        *self.variants.write().unwrap_or_else(PoisonError::into_inner) = variants;

        let override_code = self.settings.get(LANGUAGE_OVERRIDE).unwrap_or_default();
        let effective =
            locale::effective(Some(&override_code), self.hint.as_deref(), &self.default_code);
        self.apply(&effective, &override_code).await
    }

    /// Explicit user switch. Persists the choice, then rebuilds the state.
    /// `auto` or an empty code returns to following the environment hint.
    pub async fn switch_to(&self, code: &str) -> Arc<ActiveResolutionState> {
        let code = code.trim();
        let stored = if code.is_empty() { locale::AUTO } else { code };
        if let Err(e) = self.settings.set(LANGUAGE_OVERRIDE, stored) {
            tracing::warn!(error = %e, "failed to persist language override");
        }
        let effective = locale::effective(Some(stored), self.hint.as_deref(), &self.default_code);
        self.apply(&effective, stored).await
    }

    async fn apply(&self, code: &str, override_code: &str) -> Arc<ActiveResolutionState> {
        let sequence = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

        // Default enrichment completes before the requested variant is applied.
        let mut default_set = self.builtin.clone();
        if let Some(table) = self.load_table(&self.default_code).await {
            merge_non_blank(&mut default_set, table);
        }

        let (active_set, coverage) = if code == self.default_code {
            let coverage = Coverage::complete(default_set.len());
            (default_set.clone(), coverage)
        } else {
            let bundled = builtin::bundle(code).unwrap_or_default();
            let mut active = bundled.clone();
            if let Some(table) = self.load_table(code).await {
                merge_non_blank(&mut active, table);
            }
            let coverage = compute_coverage(&default_set, &active, &bundled);
            (active, coverage)
        };

        let next = Arc::new(ActiveResolutionState {
            active_variant: code.to_owned(),
            override_variant: override_code.to_owned(),
            default_set,
            active_set,
            coverage,
            sequence,
        });

        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let latest = self.issued.load(Ordering::SeqCst);
        if sequence != latest {
            tracing::debug!(code, sequence, latest, "discarding superseded variant switch");
            return current.clone();
        }
        tracing::info!(
            code,
            sequence,
            resolved = next.coverage.resolved,
            total = next.coverage.total,
            "variant activated"
        );
        *current = next.clone();
        next
    }

    /// Backend first, then each static location in order.
    async fn load_table(&self, code: &str) -> Option<BTreeMap<String, String>> {
        match self.provider.load_variant(code).await {
            Ok(payload) => return Some(payload.translations),
            Err(e) => tracing::debug!(code, error = %e, "backend variant load failed"),
        }
        for location in &self.locations {
            match self.statics.fetch(location, code).await {
                Ok(payload) => return Some(payload.translations),
                Err(e) => {
                    tracing::trace!(
                        code,
                        location = %location,
                        error = %e,
                        "static variant load failed"
                    );
                }
            }
        }
        tracing::warn!(code, "variant unavailable from every source");
        None
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<ActiveResolutionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn active_code(&self) -> String {
        self.state().active_variant.clone()
    }

    pub fn coverage(&self) -> Coverage {
        self.state().coverage.clone()
    }

    /// Variants found by the last discovery.
    pub fn available_variants(&self) -> Vec<ResourceVariant> {
        self.variants.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Look up `key`; placeholders are left verbatim.
    pub fn t(&self, key: &str) -> String {
        self.lookup(key, None)
    }

    /// Look up `key` and substitute placeholders; unknown ones are removed.
    pub fn t_with(&self, key: &str, replacements: &Replacements) -> String {
        self.lookup(key, Some(replacements))
    }

    fn lookup(&self, key: &str, replacements: Option<&Replacements>) -> String {
        let state = self.state();
        fallback::resolve(key, &state.active_set, &state.default_set, &self.builtin, replacements)
    }
}

fn merge_non_blank(target: &mut ResourceSet, table: BTreeMap<String, String>) {
    target.extend(table.into_iter().filter(|(_, v)| !v.trim().is_empty()));
}

/// A default key is missing when neither the active set nor the variant's
/// bundled strings have a non-blank value for it.
fn compute_coverage(
    default_set: &ResourceSet,
    active: &ResourceSet,
    bundled: &ResourceSet,
) -> Coverage {
    let blank = |set: &ResourceSet, key: &str| set.get(key).is_none_or(|v| v.trim().is_empty());
    let mut missing_keys: Vec<String> = default_set
        .keys()
        .filter(|k| blank(active, k) && blank(bundled, k))
        .cloned()
        .collect();
    missing_keys.sort();
    let total = default_set.len();
    Coverage {
        total,
        resolved: total - missing_keys.len(),
        missing_keys,
    }
}
