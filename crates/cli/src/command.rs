/// A parsed REPL line. Anything not starting with `/` is chat.
#[derive(Debug, PartialEq)]
pub enum Command<'a> {
    Quit,
    Help,
    Langs,
    Lang(&'a str),
    Status,
    Query(&'a str),
    Store,
    /// 1-based page of the current character's memories.
    Browse(usize),
    History(usize),
    Characters,
    Forget(Vec<&'a str>),
    Purge(&'a str),
    Clear { confirmed: bool },
    Budget(usize),
    Threshold(f32),
    Say(&'a str),
    Chat(&'a str),
    /// Unrecognized command or bad argument; carries the whole line.
    Unknown(&'a str),
}

pub const DEFAULT_HISTORY: usize = 10;

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if !line.starts_with('/') {
            return Command::Chat(line);
        }
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        let parsed = match name {
            "/q" | "/quit" | "/exit" => Some(Command::Quit),
            "/help" => Some(Command::Help),
            "/langs" => Some(Command::Langs),
            "/lang" => Some(Command::Lang(arg)),
            "/status" => Some(Command::Status),
            "/query" => Some(Command::Query(arg)),
            "/store" => Some(Command::Store),
            "/browse" => count_or(arg, 1).filter(|p| *p > 0).map(Command::Browse),
            "/history" => count_or(arg, DEFAULT_HISTORY).map(Command::History),
            "/chars" => Some(Command::Characters),
            "/forget" => {
                let ids: Vec<&str> = arg.split_whitespace().collect();
                (!ids.is_empty()).then_some(Command::Forget(ids))
            }
            "/purge" => (!arg.is_empty()).then_some(Command::Purge(arg)),
            "/clear" => match arg {
                "" => Some(Command::Clear { confirmed: false }),
                "confirm" => Some(Command::Clear { confirmed: true }),
                _ => None,
            },
            "/budget" => arg.parse().ok().map(Command::Budget),
            "/threshold" => arg
                .parse::<f32>()
                .ok()
                .filter(|x| (0.0..=1.0).contains(x))
                .map(Command::Threshold),
            "/as" => Some(Command::Say(arg)),
            _ => None,
        };
        parsed.unwrap_or(Command::Unknown(line))
    }
}

fn count_or(arg: &str, default: usize) -> Option<usize> {
    if arg.is_empty() { Some(default) } else { arg.parse().ok() }
}
