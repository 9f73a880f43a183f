//! Strings compiled into the binary. The last layer of the fallback chain, so
//! lookups have text before any network call completes.

use crate::types::ResourceSet;

/// Code of the language the bundled strings are written in.
pub const BUILTIN_CODE: &str = "en";

const EN: &[(&str, &str)] = &[
    ("plugin.title", "Memory & Feedback"),
    ("plugin.backend.online", "Backend online"),
    ("plugin.backend.offline", "Backend offline"),
    ("plugin.backend.checking", "Checking backend..."),
    ("settings.language", "Language"),
    ("settings.language.auto", "Automatic"),
    ("settings.language.coverage", "{resolved} of {total} strings translated ({percent}%)"),
    ("settings.language.switched", "Language switched to {name}"),
    ("settings.auto_ingest", "Store chat messages automatically"),
    ("settings.inject", "Use stored memories in replies"),
    ("settings.min_relevance", "Minimum relevance"),
    ("settings.budget", "Memory budget (characters)"),
    ("memory.status", "{documents} documents, {size} MB"),
    ("memory.status.unavailable", "Memory status unavailable"),
    ("memory.stored", "Stored {count} message(s)"),
    ("memory.store.failed", "Could not store messages: {error}"),
    ("memory.query.title", "Search memory"),
    ("memory.query.empty", "No memories matched"),
    ("memory.query.result", "{score} {text}"),
    ("memory.query.failed", "Memory search failed: {error}"),
    ("memory.injected", "Added {count} memories ({chars} characters)"),
    ("memory.disabled", "Memory module is disabled"),
    ("command.unknown", "Unknown command: {command}"),
    ("memory.browse.title", "Stored memories ({total})"),
    ("memory.browse.entry", "{id} [{character}] {text}"),
    ("memory.browse.more", "More available, next page: /browse {next}"),
    ("memory.browse.empty", "No stored memories"),
    ("memory.history.title", "Recently stored"),
    ("memory.characters.entry", "{name}: {total} ({auto} automatic, {manual} manual)"),
    ("memory.characters.empty", "No characters in memory"),
    ("memory.deleted", "Deleted {count} memories"),
    ("memory.cleared", "Cleared {count} memories"),
    ("memory.clear.confirm", "This deletes every stored memory. Type /clear confirm to proceed"),
    ("memory.manage.failed", "Memory request failed: {error}"),
    (
        "command.help",
        "Commands: /lang [code], /langs, /status, /query <text>, /store, /browse [page], \
         /history [n], /chars, /forget <id...>, /purge <character>, /clear, /budget <n>, \
         /threshold <x>, /as <text>, /q",
    ),
    ("language.unknown", "Unknown language: {code}"),
    ("language.list.entry", "{code} {name} ({native})"),
];

/// Bundled strings for a variant, if any ship with the binary.
pub fn bundle(code: &str) -> Option<ResourceSet> {
    (code == BUILTIN_CODE).then(|| {
        EN.iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    })
}

/// The bundled base-language strings.
pub fn base() -> ResourceSet {
    bundle(BUILTIN_CODE).unwrap_or_default()
}
