use std::error::Error;
use std::io::Write;

use log::info;
use tokio::io::{ AsyncBufReadExt, BufReader };

use super::relay::RelayClient;
use super::session::ChatSession;
use super::speech::{ NoRecognizer, SpeechCapture };

const HELP: &str = "Commands: /clear (delete history), /voice (toggle voice input), /quit";

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Prompt(&'a str),
    Clear,
    Voice,
    Quit,
    Help,
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/clear" => Input::Clear,
        "/voice" => Input::Voice,
        "/quit" | "/exit" => Input::Quit,
        "/help" => Input::Help,
        text => Input::Prompt(text),
    }
}

fn print_flush(text: &str) {
    let mut out = std::io::stdout();
    let _ = write!(out, "{}", text);
    let _ = out.flush();
}

/// Holds back reply text that could be the start of the stream error
/// sentinel, so the marker never reaches the terminal.
struct SentinelHoldback<'a> {
    sentinel: Option<&'a str>,
    held: String,
}

impl<'a> SentinelHoldback<'a> {
    fn new(sentinel: Option<&'a str>) -> Self {
        Self { sentinel, held: String::new() }
    }

    /// Returns the part of `text` that is safe to print now.
    fn push(&mut self, text: &str) -> String {
        let Some(sentinel) = self.sentinel else {
            return text.to_string();
        };
        self.held.push_str(text);
        let split = self.held
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| sentinel.starts_with(&self.held[i..]))
            .unwrap_or(self.held.len());
        let rest = self.held.split_off(split);
        std::mem::replace(&mut self.held, rest)
    }

    /// Releases held text at end of reply, dropping a complete sentinel.
    fn finish(&mut self) -> String {
        let held = std::mem::take(&mut self.held);
        match self.sentinel {
            Some(sentinel) if held == sentinel => String::new(),
            _ => held,
        }
    }
}

/// Line-based chat surface over stdin/stdout.
pub async fn run_chat(
    relay_url: &str,
    system_instruction: Option<String>,
    stream_error_sentinel: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let relay = RelayClient::new(relay_url);
    let sentinel = stream_error_sentinel.clone().filter(|s| !s.is_empty());
    let mut session = ChatSession::new()
        .with_system_instruction(system_instruction)
        .with_stream_error_sentinel(stream_error_sentinel);
    // A terminal has no speech recognizer; voice input stays disabled.
    let mut speech = SpeechCapture::<NoRecognizer>::new(None);

    info!("Chatting with relay at {}", relay.endpoint());
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_flush("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => {
                break;
            }
            Input::Help => println!("{}", HELP),
            Input::Clear => {
                session.clear_history();
                println!("(history cleared)");
            }
            Input::Voice => {
                speech.toggle();
                if let Some(message) = speech.error() {
                    println!("{}", message);
                }
            }
            Input::Prompt(text) => {
                session.set_input(text);
                println!("Thinking...");
                print_flush("🤖 Gemini: ");
                let mut holdback = SentinelHoldback::new(sentinel.as_deref());
                let outcome = session.send_with(&relay, |text| print_flush(&holdback.push(text))).await;
                print_flush(&holdback.finish());
                println!();
                if outcome.is_err() || session.error().is_some() {
                    println!("{}", session.error().unwrap_or("Request failed"));
                }
            }
        }
    }

    info!("Chat ended with {} message(s) in history", session.messages().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognized() {
        assert_eq!(parse_input("  /clear "), Input::Clear);
        assert_eq!(parse_input("/voice"), Input::Voice);
        assert_eq!(parse_input("/exit"), Input::Quit);
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input(" こんにちは "), Input::Prompt("こんにちは"));
    }

    #[test]
    fn sentinel_is_never_printed() {
        let mut holdback = SentinelHoldback::new(Some("\u{0}[ERR]"));
        let mut printed = String::new();
        for chunk in ["partial ", "answer\u{0}[E", "RR]"] {
            printed.push_str(&holdback.push(chunk));
        }
        printed.push_str(&holdback.finish());
        assert_eq!(printed, "partial answer");
    }

    #[test]
    fn text_resembling_sentinel_prefix_is_released() {
        let mut holdback = SentinelHoldback::new(Some("[ERR]"));
        assert_eq!(holdback.push("see ["), "see ");
        assert_eq!(holdback.push("E"), "");
        assert_eq!(holdback.push("x]"), "[Ex]");
        assert_eq!(holdback.push("tail ["), "tail ");
        assert_eq!(holdback.finish(), "[");
    }

    #[test]
    fn without_sentinel_text_passes_through() {
        let mut holdback = SentinelHoldback::new(None);
        assert_eq!(holdback.push("[ERR]"), "[ERR]");
        assert_eq!(holdback.finish(), "");
    }
}
