//! Interactive prompt loop
//!
//! Asks for a method, a relative file and a position, issues the call and
//! prints the result as JSON. Bad input re-prompts; `q`, `quit` or end of
//! input ends the loop the same way choosing shutdown does.

use crate::driver::DriverError;
use crate::session::{LanguageSession, QueryKind, SessionError};
use serde::Serialize;
use std::io;
use std::path::Path;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tracing::{debug, error, info, warn};

pub const METHOD_PROMPT: &str = "Choose (1) hover, (2) definition, (3) references, (4) shutdown: ";
pub const FILE_PROMPT: &str = "Choose a file path relative to root: ";
pub const LINE_PROMPT: &str = "Choose a 0-indexed line: ";
pub const CHARACTER_PROMPT: &str = "Choose a 0-indexed character offset for that line: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Query(QueryKind),
    Shutdown,
}

fn parse_choice(input: &str) -> Option<Choice> {
    match input {
        "1" => Some(Choice::Query(QueryKind::Hover)),
        "2" => Some(Choice::Query(QueryKind::Definition)),
        "3" => Some(Choice::Query(QueryKind::References)),
        "4" => Some(Choice::Shutdown),
        _ => None,
    }
}

fn parse_relative_path(input: &str) -> Option<String> {
    (!input.is_empty() && !Path::new(input).is_absolute()).then(|| input.to_string())
}

fn parse_offset(input: &str) -> Option<u32> {
    input.parse().ok()
}

fn is_quit(input: &str) -> bool {
    matches!(input, "q" | "quit")
}

/// Line-oriented console
pub struct Prompter<R, W> {
    input: R,
    output: W,
    buffer: String,
}

impl Prompter<BufReader<Stdin>, Stdout> {
    /// Prompt on stdout, read answers from stdin
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> Prompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            buffer: String::new(),
        }
    }

    pub async fn say(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await
    }

    /// One answer; `None` on quit or end of input
    async fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.say(prompt).await?;

        self.buffer.clear();
        if self.input.read_line(&mut self.buffer).await? == 0 {
            debug!("Console input closed");
            return Ok(None);
        }

        let answer = self.buffer.trim();
        if is_quit(answer) {
            return Ok(None);
        }
        Ok(Some(answer.to_string()))
    }

    /// Re-ask until `parse` accepts the answer
    async fn ask_until<T>(
        &mut self,
        prompt: &str,
        parse: impl Fn(&str) -> Option<T> + Send,
    ) -> io::Result<Option<T>> {
        loop {
            let Some(answer) = self.ask(prompt).await? else {
                return Ok(None);
            };
            if let Some(value) = parse(&answer) {
                return Ok(Some(value));
            }
            debug!("Rejected console input {:?}", answer);
        }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}

/// Initialize, run the prompt loop, then shut down and close
///
/// The session is closed on every path. A failed initialize skips the loop
/// and the shutdown request.
pub async fn run<S, R, W>(
    session: &mut S,
    root: &str,
    prompter: &mut Prompter<R, W>,
) -> Result<(), DriverError>
where
    S: LanguageSession,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    if let Err(e) = session.initialize(root).await {
        if let Err(close_error) = session.close().await {
            warn!("Failed to close session: {}", close_error);
        }
        return Err(e.into());
    }

    let looped = prompt_loop(session, prompter).await;

    info!("Leaving interactive loop");
    let shutdown = session.shutdown().await;
    let closed = session.close().await;

    looped?;
    shutdown?;
    closed?;
    Ok(())
}

async fn prompt_loop<S, R, W>(
    session: &mut S,
    prompter: &mut Prompter<R, W>,
) -> Result<(), DriverError>
where
    S: LanguageSession,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let kind = match prompter.ask_until(METHOD_PROMPT, parse_choice).await? {
            Some(Choice::Query(kind)) => kind,
            Some(Choice::Shutdown) | None => return Ok(()),
        };
        let Some(file) = prompter.ask_until(FILE_PROMPT, parse_relative_path).await? else {
            return Ok(());
        };
        let Some(line) = prompter.ask_until(LINE_PROMPT, parse_offset).await? else {
            return Ok(());
        };
        let Some(character) = prompter.ask_until(CHARACTER_PROMPT, parse_offset).await? else {
            return Ok(());
        };

        debug!("{} {}:{}:{}", kind, file, line, character);
        match kind {
            QueryKind::Hover => {
                let result = session.hover(&file, line, character).await;
                print_response(prompter, result).await?;
            }
            QueryKind::Definition => {
                let result = session.definition(&file, line, character).await;
                print_response(prompter, result).await?;
            }
            QueryKind::References => {
                let result = session.references(&file, line, character).await;
                print_response(prompter, result).await?;
            }
        }
    }
}

async fn print_response<T, R, W>(
    prompter: &mut Prompter<R, W>,
    result: Result<T, SessionError>,
) -> io::Result<()>
where
    T: Serialize,
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let text = match result.map(|response| serde_json::to_string_pretty(&response)) {
        Ok(Ok(json)) => format!("\n\n{json}\n\n\n"),
        Ok(Err(e)) => format!("ERROR: could not render response: {e}\n"),
        Err(e) => {
            if e.is_transport() {
                error!("Connection to the server failed: {}", e);
            } else if e.is_protocol() {
                warn!("Server rejected the call: {}", e);
            } else if e.is_invalid_state() {
                debug!("Call refused locally: {}", e);
            } else {
                warn!("Call failed: {}", e);
            }
            format!("ERROR: {e}\n")
        }
    };
    prompter.say(&text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockLanguageSession;
    use lsp_types::Location;

    fn initialized_session() -> MockLanguageSession {
        let mut session = MockLanguageSession::new();
        session
            .expect_initialize()
            .withf(|root| root == "/workspace")
            .times(1)
            .returning(|_| Ok(()));
        session.expect_shutdown().times(1).returning(|| Ok(()));
        session.expect_close().times(1).returning(|| Ok(()));
        session
    }

    async fn drive(
        session: &mut MockLanguageSession,
        input: &str,
    ) -> (Result<(), DriverError>, String) {
        let mut prompter = Prompter::new(input.as_bytes(), Vec::new());
        let result = run(session, "/workspace", &mut prompter).await;
        let output = String::from_utf8(prompter.into_output()).unwrap();
        (result, output)
    }

    #[tokio::test]
    async fn test_definition_choice_issues_exactly_one_call() {
        let mut session = initialized_session();
        session
            .expect_definition()
            .withf(|document, line, character| {
                document == "a/b.py" && *line == 25 && *character == 8
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![Location::new(
                    "file:///workspace/a/b.py".parse().unwrap(),
                    Default::default(),
                )])
            });
        session.expect_hover().never();
        session.expect_references().never();

        let (result, output) = drive(&mut session, "2\na/b.py\n25\n8\n4\n").await;

        result.unwrap();
        assert!(output.contains("file:///workspace/a/b.py"));
        assert_eq!(output.matches(METHOD_PROMPT).count(), 2);
    }

    #[tokio::test]
    async fn test_absolute_path_reprompts_without_a_call() {
        let mut session = initialized_session();
        session.expect_hover().never();
        session.expect_definition().never();
        session.expect_references().never();

        let (result, output) = drive(&mut session, "1\n/etc/passwd\n").await;

        result.unwrap();
        assert_eq!(output.matches(FILE_PROMPT).count(), 2);
        assert!(!output.contains(LINE_PROMPT));
    }

    #[tokio::test]
    async fn test_bad_numbers_reprompt_until_valid() {
        let mut session = initialized_session();
        session
            .expect_references()
            .withf(|document, line, character| document == "x.py" && *line == 7 && *character == 2)
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));

        let input = "9\n3\nx.py\n-1\nseven\n7\n2.5\n2\nquit\n";
        let (result, output) = drive(&mut session, input).await;

        result.unwrap();
        assert_eq!(output.matches(METHOD_PROMPT).count(), 3);
        assert_eq!(output.matches(LINE_PROMPT).count(), 3);
        assert_eq!(output.matches(CHARACTER_PROMPT).count(), 2);
    }

    #[tokio::test]
    async fn test_call_errors_are_printed_and_the_loop_continues() {
        let mut session = initialized_session();
        session.expect_hover().times(2).returning(|_, _, _| {
            Err(SessionError::Protocol {
                method: "textDocument/hover".to_string(),
                code: -32603,
                message: "index not ready".to_string(),
            })
        });

        let (result, output) = drive(&mut session, "1\na.py\n0\n0\n1\na.py\n0\n0\nq\n").await;

        result.unwrap();
        assert_eq!(output.matches("ERROR: ").count(), 2);
        assert!(output.contains("index not ready"));
    }

    #[tokio::test]
    async fn test_lost_connection_is_printed_and_the_loop_continues() {
        let mut session = initialized_session();
        session.expect_references().times(1).returning(|_, _, _| {
            Err(SessionError::Transport(
                "connection closed during textDocument/references".to_string(),
            ))
        });
        session
            .expect_definition()
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));

        let input = "3\na.py\n0\n0\n2\na.py\n0\n0\n4\n";
        let (result, output) = drive(&mut session, input).await;

        result.unwrap();
        assert!(output.contains("ERROR: Transport error: connection closed during"));
        assert!(output.contains("\n\n[]\n\n\n"));
    }

    #[tokio::test]
    async fn test_null_hover_prints_null() {
        let mut session = initialized_session();
        session.expect_hover().times(1).returning(|_, _, _| Ok(None));

        let (result, output) = drive(&mut session, "1\na.py\n1\n1\n4\n").await;

        result.unwrap();
        assert!(output.contains("\n\nnull\n\n\n"));
    }

    #[tokio::test]
    async fn test_failed_initialize_closes_without_prompting() {
        let mut session = MockLanguageSession::new();
        session.expect_initialize().times(1).returning(|_| {
            Err(SessionError::Transport("connection closed during initialize".to_string()))
        });
        session.expect_shutdown().never();
        session.expect_close().times(1).returning(|| Ok(()));

        let (result, output) = drive(&mut session, "1\n").await;

        assert!(matches!(result, Err(DriverError::Session(_))));
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_failure_still_closes() {
        let mut session = MockLanguageSession::new();
        session.expect_initialize().returning(|_| Ok(()));
        session.expect_shutdown().times(1).returning(|| {
            Err(SessionError::Transport("broken pipe".to_string()))
        });
        session.expect_close().times(1).returning(|| Ok(()));

        let (result, _) = drive(&mut session, "4\n").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_input_parsers() {
        assert_eq!(parse_choice("2"), Some(Choice::Query(QueryKind::Definition)));
        assert_eq!(parse_choice("4"), Some(Choice::Shutdown));
        assert_eq!(parse_choice("5"), None);
        assert_eq!(parse_relative_path("a/b.py").as_deref(), Some("a/b.py"));
        assert_eq!(parse_relative_path("/etc/passwd"), None);
        assert_eq!(parse_relative_path(""), None);
        assert_eq!(parse_offset("25"), Some(25));
        assert_eq!(parse_offset("-1"), None);
        assert!(is_quit("q") && is_quit("quit") && !is_quit("4"));
    }
}
