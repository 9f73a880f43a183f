use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

/// One outcome of prompting the terminal.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    /// Ctrl-D, or the reader thread is gone.
    Closed,
    Failed(String),
}

impl From<ReadlineError> for Line {
    fn from(err: ReadlineError) -> Self {
        match err {
            ReadlineError::Interrupted => Line::Interrupted,
            ReadlineError::Eof => Line::Closed,
            other => Line::Failed(other.to_string()),
        }
    }
}

/// Blocking rustyline editor on its own thread, prompted on demand so
/// output printed between lines never lands under a live prompt.
pub struct LineReader {
    ready: std::sync::mpsc::Sender<()>,
    lines: mpsc::UnboundedReceiver<Line>,
    prompted: bool,
}

impl LineReader {
    pub fn spawn(prompt: &'static str) -> Self {
        let (ready, ready_rx) = std::sync::mpsc::channel();
        let (line_tx, lines) = mpsc::unbounded_channel();
        std::thread::spawn(move || read_lines(prompt, &ready_rx, &line_tx));
        Self { ready, lines, prompted: false }
    }

    /// Cancel safe: if the caller stops waiting, the outstanding prompt is
    /// reused by the next call instead of prompting twice.
    pub async fn next_line(&mut self) -> Line {
        if !self.prompted {
            if self.ready.send(()).is_err() {
                return Line::Closed;
            }
            self.prompted = true;
        }
        let line = self.lines.recv().await.unwrap_or(Line::Closed);
        self.prompted = false;
        line
    }
}

fn read_lines(
    prompt: &str,
    ready: &std::sync::mpsc::Receiver<()>,
    lines: &mpsc::UnboundedSender<Line>,
) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            let _ = lines.send(e.into());
            return;
        }
    };
    while ready.recv().is_ok() {
        let line = match editor.readline(prompt) {
            Ok(text) => {
                let _ = editor.add_history_entry(text.as_str());
                Line::Text(text)
            }
            Err(e) => e.into(),
        };
        let last = !matches!(line, Line::Text(_));
        if lines.send(line).is_err() || last {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readline_errors_map_to_lines() {
        assert_eq!(Line::from(ReadlineError::Interrupted), Line::Interrupted);
        assert_eq!(Line::from(ReadlineError::Eof), Line::Closed);
        let io = std::io::Error::other("tty gone");
        let Line::Failed(msg) = Line::from(ReadlineError::Io(io)) else {
            panic!("io errors should fail the reader");
        };
        assert!(msg.contains("tty gone"));
    }
}
