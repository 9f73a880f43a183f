use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use mnemo_backend::types::{LanguageEntry, VariantPayload};
use mnemo_backend::{StaticTranslations, TranslationProvider};

use crate::i18n::builtin::BUILTIN_CODE;
use crate::types::ResourceVariant;

/// Codes tried at static locations when discovery is unavailable, in priority order.
pub const CANDIDATE_CODES: &[&str] = &["en", "ko", "ja", "zh", "es", "fr", "de", "ru", "pt", "it"];

/// Finds out which variants exist.
pub struct ResourceCatalog {
    provider: Arc<dyn TranslationProvider>,
    statics: Arc<dyn StaticTranslations>,
    locations: Vec<String>,
    default_code: String,
}

impl ResourceCatalog {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        statics: Arc<dyn StaticTranslations>,
        locations: Vec<String>,
        default_code: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            statics,
            locations,
            default_code: default_code.into(),
        }
    }

    /// Ask the backend first; scan static locations only when it fails or
    /// lists nothing. The default variant is always in the result, first if
    /// it had to be added.
    pub async fn discover(&self) -> Vec<ResourceVariant> {
        let found = match self.provider.discover().await {
            Ok(entries) if !entries.is_empty() => entries.into_iter().map(from_entry).collect(),
            Ok(_) => {
                tracing::debug!("discovery listed no variants, probing static locations");
                self.scan_static().await
            }
            Err(e) => {
                tracing::warn!(error = %e, "variant discovery failed, probing static locations");
                self.scan_static().await
            }
        };
        finalize(found, &self.default_code)
    }

    /// Try every candidate in parallel per location; the first location
    /// with any hit wins.
    async fn scan_static(&self) -> Vec<ResourceVariant> {
        for location in &self.locations {
            let lookups = CANDIDATE_CODES.iter().map(|&code| async move {
                (code, self.statics.exists(location, code).await)
            });
            let hits: Vec<&str> = join_all(lookups)
                .await
                .into_iter()
                .filter_map(|(code, exists)| exists.then_some(code))
                .collect();
            if hits.is_empty() {
                tracing::debug!(location = %location, "no variants at static location");
                continue;
            }
            tracing::info!(
                location = %location,
                count = hits.len(),
                "variants found at static location"
            );
            return join_all(hits.into_iter().map(|code| self.describe(location, code))).await;
        }
        Vec::new()
    }

    /// Load a variant's file for its display metadata, degrading to the bare code.
    async fn describe(&self, location: &str, code: &str) -> ResourceVariant {
        match self.statics.fetch(location, code).await {
            Ok(payload) => from_payload(code, &payload),
            Err(e) => {
                tracing::debug!(code, error = %e, "variant metadata unavailable");
                ResourceVariant::bare(code)
            }
        }
    }
}

fn from_entry(entry: LanguageEntry) -> ResourceVariant {
    let code = entry.code.trim().to_owned();
    ResourceVariant {
        display_name: entry.name.unwrap_or_else(|| code.clone()),
        native_name: entry.native_name.unwrap_or_else(|| code.clone()),
        code,
    }
}

fn from_payload(code: &str, payload: &VariantPayload) -> ResourceVariant {
    let meta = payload.meta.clone().unwrap_or_default();
    ResourceVariant {
        code: code.to_owned(),
        display_name: meta.language.unwrap_or_else(|| code.to_owned()),
        native_name: meta.native_name.unwrap_or_else(|| code.to_owned()),
    }
}

fn default_variant(code: &str) -> ResourceVariant {
    if code == BUILTIN_CODE {
        ResourceVariant {
            code: code.to_owned(),
            display_name: "English".into(),
            native_name: "English".into(),
        }
    } else {
        ResourceVariant::bare(code)
    }
}

/// Drop blank and repeated codes (first occurrence wins) and guarantee the default.
fn finalize(found: Vec<ResourceVariant>, default_code: &str) -> Vec<ResourceVariant> {
    let mut seen = HashSet::new();
    let mut out: Vec<ResourceVariant> = found
        .into_iter()
        .filter(|v| !v.code.is_empty() && seen.insert(v.code.clone()))
        .collect();
    if !seen.contains(default_code) {
        out.insert(0, default_variant(default_code));
    }
    out
}
