use std::sync::Arc;
use std::time::Duration;

use mnemo_backend::http::HttpBackend;
use mnemo_backend::types::{BrowseQuery, DeleteRequest, MemoryDocument};
use mnemo_core::config::{MnemoCfg, SharedCfg};
use mnemo_core::i18n::{Replacements, locale};
use mnemo_core::io::timeline::{self, FeedSender, MemoryTimeline, Timeline};
use mnemo_core::memory::inject::InjectionOutcome;
use mnemo_core::settings::JsonFileSettings;
use mnemo_core::types::{ChatEvent, OutgoingRequest};
use mnemo_core::{Backends, Session};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::command::Command;
use crate::input::{Line, LineReader};

mod command;
mod input;

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;
/// Messages sent along with each composed request, and stored by `/store`.
const CONTEXT_MESSAGES: usize = 20;
const BROWSE_PAGE: usize = 10;
const PREVIEW_CHARS: usize = 80;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("MNEMO_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    let cfg = load_cfg().await?;
    let backend = Arc::new(HttpBackend::with_timeout(
        cfg.backend_url.clone(),
        Duration::from_secs(cfg.request_timeout_secs),
    )?);
    let settings_path = std::env::var("MNEMO_SETTINGS")
        .map(Into::into)
        .unwrap_or_else(|_| JsonFileSettings::default_path());
    let settings = Arc::new(JsonFileSettings::open(settings_path));
    let character = std::env::var("MNEMO_CHARACTER").unwrap_or_else(|_| "Assistant".into());
    let chat = Arc::new(MemoryTimeline::new(character));

    let session = Session::new(
        SharedCfg::new(cfg),
        Backends::shared(backend),
        settings,
        chat.clone(),
        locale::hint_from_env(),
    );
    session.start().await;

    let (feed_tx, feed_rx) = timeline::channel(64);
    let ingestion = session.spawn_ingestion(feed_rx);
    let token = session.shutdown_token();

    let result = run_repl(&session, &chat, feed_tx, token).await;
    session.shutdown();
    let _ = ingestion.await;
    result
}

/// `mnemo_config` when DATABASE_URL is set and reachable, else `MNEMO_*` env vars.
async fn load_cfg() -> anyhow::Result<MnemoCfg> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return Ok(MnemoCfg::from_env());
    };
    let connect = tokio::time::timeout(
        Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
        sqlx::postgres::PgPoolOptions::new().max_connections(2).connect(&url),
    )
    .await;
    match connect {
        Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
            Ok(()) => {
                tracing::info!("database connected and migrations applied");
                Ok(MnemoCfg::load(&pool).await?)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "database migration failed, using environment config"
                );
                Ok(MnemoCfg::from_env())
            }
        },
        Ok(Err(e)) => {
            tracing::warn!(
                error = %e,
                "failed to connect DATABASE_URL, using environment config"
            );
            Ok(MnemoCfg::from_env())
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = DB_CONNECT_TIMEOUT_SECS,
                "database connect timed out, using environment config"
            );
            Ok(MnemoCfg::from_env())
        }
    }
}

fn vars(pairs: &[(&str, String)]) -> Replacements {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

/// First `PREVIEW_CHARS` characters of a stored text, on one line.
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

async fn run_repl(
    session: &Session,
    chat: &MemoryTimeline,
    feed_tx: FeedSender,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let r = session.resolver();
    println!("{}", r.t("plugin.title"));
    let backend_key = if session.availability().is_available() {
        "plugin.backend.online"
    } else {
        "plugin.backend.offline"
    };
    println!("{}", r.t(backend_key));
    println!("{}", r.t("command.help"));

    let mut reader = LineReader::spawn("You> ");
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                token.cancel();
                break;
            }
            line = reader.next_line() => line,
        };
        match line {
            Line::Text(text) => match Command::parse(&text) {
                Command::Quit => break,
                Command::Chat("") => {}
                command => handle_command(session, chat, &feed_tx, command).await?,
            },
            Line::Interrupted => {
                token.cancel();
                break;
            }
            Line::Closed => break,
            Line::Failed(err) => {
                eprintln!("input error: {err}");
                break;
            }
        }
    }
    println!();
    Ok(())
}

async fn handle_command(
    session: &Session,
    chat: &MemoryTimeline,
    feed_tx: &FeedSender,
    command: Command<'_>,
) -> anyhow::Result<()> {
    let r = session.resolver();
    match command {
        // handled by the read loop
        Command::Quit => {}
        Command::Help => println!("{}", r.t("command.help")),
        Command::Langs => {
            for v in r.available_variants() {
                let entry = vars(&[
                    ("code", v.code),
                    ("name", v.display_name),
                    ("native", v.native_name),
                ]);
                println!("{}", r.t_with("language.list.entry", &entry));
            }
        }
        Command::Lang(code) => {
            if !code.is_empty()
                && code != locale::AUTO
                && !r.available_variants().iter().any(|v| v.code == code)
            {
                println!("{}", r.t_with("language.unknown", &vars(&[("code", code.to_owned())])));
                return Ok(());
            }
            if !code.is_empty() {
                let state = session.switch_language(code).await;
                let name = vars(&[("name", state.active_variant.clone())]);
                println!("{}", r.t_with("settings.language.switched", &name));
            }
            let coverage = r.coverage();
            let counts = vars(&[
                ("resolved", coverage.resolved.to_string()),
                ("total", coverage.total.to_string()),
                ("percent", format!("{:.0}", coverage.percent())),
            ]);
            println!(
                "{}: {} ({})",
                r.t("settings.language"),
                r.active_code(),
                r.t_with("settings.language.coverage", &counts)
            );
        }
        Command::Status => match session.memory_status().await {
            Ok(status) => {
                let counts = vars(&[
                    ("documents", status.document_count.to_string()),
                    ("size", format!("{:.2}", status.total_size_mb)),
                ]);
                println!("{}", r.t_with("memory.status", &counts));
            }
            Err(e) => {
                tracing::debug!(error = %e, "status request failed");
                println!("{}", r.t("memory.status.unavailable"));
            }
        },
        Command::Query(query) => {
            println!("{}", r.t("memory.query.title"));
            match session.query_memory(query).await {
                Ok(hits) if hits.is_empty() => println!("{}", r.t("memory.query.empty")),
                Ok(hits) => {
                    for hit in hits {
                        let score = format!("{:.2}", hit.score);
                        let hit = vars(&[("score", score), ("text", hit.text)]);
                        println!("{}", r.t_with("memory.query.result", &hit));
                    }
                }
                Err(e) => println!("{}", r.t_with("memory.query.failed", &error_vars(&e))),
            }
        }
        Command::Store => match session.store_manual(&chat.recent(CONTEXT_MESSAGES)).await {
            Ok(count) => {
                println!("{}", r.t_with("memory.stored", &vars(&[("count", count.to_string())])));
            }
            Err(e) => println!("{}", r.t_with("memory.store.failed", &error_vars(&e))),
        },
        Command::Browse(page) => {
            let query = BrowseQuery {
                character: Some(chat.character()),
                offset: (page - 1) * BROWSE_PAGE,
                limit: BROWSE_PAGE,
                ..BrowseQuery::default()
            };
            match session.browse_memory(&query).await {
                Ok(found) if found.documents.is_empty() => {
                    println!("{}", r.t("memory.browse.empty"));
                }
                Ok(found) => {
                    let total = vars(&[("total", found.total.to_string())]);
                    println!("{}", r.t_with("memory.browse.title", &total));
                    print_documents(session, &found.documents);
                    if found.has_more {
                        let next = vars(&[("next", (page + 1).to_string())]);
                        println!("{}", r.t_with("memory.browse.more", &next));
                    }
                }
                Err(e) => println!("{}", r.t_with("memory.manage.failed", &error_vars(&e))),
            }
        }
        Command::History(limit) => match session.memory_history(limit).await {
            Ok(docs) if docs.is_empty() => println!("{}", r.t("memory.browse.empty")),
            Ok(docs) => {
                println!("{}", r.t("memory.history.title"));
                print_documents(session, &docs);
            }
            Err(e) => println!("{}", r.t_with("memory.manage.failed", &error_vars(&e))),
        },
        Command::Characters => match session.memory_characters().await {
            Ok(chars) if chars.is_empty() => println!("{}", r.t("memory.characters.empty")),
            Ok(chars) => {
                for c in chars {
                    let entry = vars(&[
                        ("name", c.name),
                        ("total", c.total.to_string()),
                        ("auto", c.auto_stored.to_string()),
                        ("manual", c.manual.to_string()),
                    ]);
                    println!("{}", r.t_with("memory.characters.entry", &entry));
                }
            }
            Err(e) => println!("{}", r.t_with("memory.manage.failed", &error_vars(&e))),
        },
        Command::Forget(ids) => delete(session, &DeleteRequest::ids(ids)).await,
        Command::Purge(character) => delete(session, &DeleteRequest::character(character)).await,
        Command::Clear { confirmed: false } => println!("{}", r.t("memory.clear.confirm")),
        Command::Clear { confirmed: true } => match session.clear_memory().await {
            Ok(count) => {
                println!("{}", r.t_with("memory.cleared", &vars(&[("count", count.to_string())])));
            }
            Err(e) => println!("{}", r.t_with("memory.manage.failed", &error_vars(&e))),
        },
        Command::Budget(n) => {
            session.cfg().update(|c| c.injection_budget_chars = n);
            println!("{}: {n}", r.t("settings.budget"));
        }
        Command::Threshold(x) => {
            session.cfg().update(|c| c.min_relevance = x);
            println!("{}: {x}", r.t("settings.min_relevance"));
        }
        Command::Say(text) => {
            let name = chat.character();
            post(chat, feed_tx, ChatEvent::assistant(event_id(), name, text)).await;
        }
        Command::Unknown(line) => {
            println!("{}", r.t_with("command.unknown", &vars(&[("command", line.to_owned())])));
        }
        Command::Chat(text) => {
            post(chat, feed_tx, ChatEvent::user(event_id(), "You", text)).await;
            let mut request = OutgoingRequest::new(
                format!("You are {}.", chat.character()),
                chat.recent(CONTEXT_MESSAGES),
            );
            let outcome = session.prepare_request(&mut request).await;
            if let InjectionOutcome::Injected { passages, chars, .. } = outcome {
                let counts = vars(&[("count", passages.to_string()), ("chars", chars.to_string())]);
                println!("{}", r.t_with("memory.injected", &counts));
            }
            println!("{}", request.system_prompt);
        }
    }
    Ok(())
}

fn error_vars(e: &impl std::fmt::Display) -> Replacements {
    vars(&[("error", e.to_string())])
}

fn print_documents(session: &Session, docs: &[MemoryDocument]) {
    let r = session.resolver();
    for doc in docs {
        let entry = vars(&[
            ("id", doc.id.clone()),
            ("character", doc.character.clone()),
            ("text", preview(&doc.text)),
        ]);
        println!("{}", r.t_with("memory.browse.entry", &entry));
    }
}

async fn delete(session: &Session, request: &DeleteRequest) {
    let r = session.resolver();
    match session.delete_memory(request).await {
        Ok(done) => {
            let count = vars(&[("count", done.deleted.to_string())]);
            println!("{}", r.t_with("memory.deleted", &count));
        }
        Err(e) => println!("{}", r.t_with("memory.manage.failed", &error_vars(&e))),
    }
}

fn event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Put an event on the local timeline and announce it to ingestion.
async fn post(chat: &MemoryTimeline, feed_tx: &FeedSender, event: ChatEvent) {
    chat.append(event.clone());
    if let Err(e) = timeline::submit(feed_tx, event).await {
        tracing::warn!(error = %e, "ingestion feed closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b"), "a b");
        let long = "é".repeat(PREVIEW_CHARS + 5);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
        assert!(shown.ends_with("..."));
    }
}
