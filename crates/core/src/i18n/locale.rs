/// Override value meaning "follow the environment".
pub const AUTO: &str = "auto";

/// Reduce a locale tag such as `ko_KR.UTF-8` or `pt-BR` to its language code.
pub fn normalize(tag: &str) -> Option<String> {
    let tag = tag.trim();
    let base = tag.split(['.', '@']).next().unwrap_or("");
    let lang = base.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
    if lang.is_empty() || lang == "c" || lang == "posix" {
        return None;
    }
    lang.chars().all(|c| c.is_ascii_alphabetic()).then_some(lang)
}

/// Environment language hint. Not authoritative; only used when no override is set.
pub fn hint_from_env() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|v| normalize(&v))
}

/// The variant to activate: a real override wins, `auto`/empty defers to the
/// hint, and without a hint the default is used.
pub fn effective(override_code: Option<&str>, hint: Option<&str>, default: &str) -> String {
    match override_code.map(str::trim) {
        Some(code) if !code.is_empty() && !code.eq_ignore_ascii_case(AUTO) => code.to_owned(),
        _ => hint
            .and_then(normalize)
            .unwrap_or_else(|| default.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_region_and_encoding() {
        assert_eq!(normalize("ko_KR.UTF-8").as_deref(), Some("ko"));
        assert_eq!(normalize("pt-BR").as_deref(), Some("pt"));
        assert_eq!(normalize("de_DE@euro").as_deref(), Some("de"));
        assert_eq!(normalize("EN").as_deref(), Some("en"));
    }

    #[test]
    fn normalize_rejects_posix_and_junk() {
        assert_eq!(normalize("C"), None);
        assert_eq!(normalize("POSIX"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("12"), None);
    }

    #[test]
    fn override_beats_hint() {
        assert_eq!(effective(Some("ja"), Some("ko_KR"), "en"), "ja");
    }

    #[test]
    fn auto_and_empty_defer_to_hint() {
        assert_eq!(effective(Some("auto"), Some("ko_KR"), "en"), "ko");
        assert_eq!(effective(Some(""), Some("fr"), "en"), "fr");
        assert_eq!(effective(None, Some("fr"), "en"), "fr");
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(effective(None, None, "en"), "en");
        assert_eq!(effective(Some("AUTO"), Some("C"), "en"), "en");
    }
}
