//! Interactive terminal consent prompt
//!
//! Prints the request, emits the simulated haptic pulse and reads `y/n`
//! until it gets a recognisable answer. End of input or Ctrl-C yields
//! `Cancelled`; an abandoned prompt is never treated as a veto.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ConsentDecision, ConsentRequest};

use super::{ConsentPrompt, Result, VcaError};

const RULE: &str = "============================================================";

/// Parse a free-form answer. `None` when it is neither yes nor no.
pub fn parse_answer(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Human-readable rendering of a consent request
pub fn render_request(request: &ConsentRequest) -> String {
    let state = &request.cognitive_state;
    let mut out = String::new();

    let _ = writeln!(out, "\n{RULE}\n  VCA CONFIRMATION REQUEST\n{RULE}\n");
    let _ = writeln!(out, "  Intent: {}", request.intent);
    if !request.task_data.is_empty() {
        let _ = writeln!(out, "  Details: {}", request.task_data);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  Confidence: {}%", state.confidence);
    let _ = writeln!(out, "  Threshold: {}%", state.threshold);
    for (name, value) in [
        ("Fatigue", state.fatigue),
        ("Focus", state.focus),
        ("Urgency", state.urgency),
    ] {
        if let Some(v) = value {
            let _ = writeln!(out, "  {name}: {v}/100");
        }
    }
    let _ = writeln!(out);

    let status = if request.proof_verified {
        "VERIFIED (zk-SNARK)"
    } else {
        "UNVERIFIED"
    };
    let _ = writeln!(out, "  Proof Status: {status}");
    let _ = writeln!(out, "  Proof Type: {}", request.proof_type);
    let _ = writeln!(out);
    let _ = writeln!(out, "  VCA ID: {}", request.vca_id);
    let _ = writeln!(
        out,
        "  Timestamp: {}",
        request.created_at.format("%Y-%m-%dT%H:%M:%SZ")
    );

    if let Some(previous) = &request.previous {
        let _ = writeln!(
            out,
            "\n  Previous response: {} at {}",
            previous.user_response,
            previous.timestamp.format("%Y-%m-%dT%H:%M:%SZ")
        );
    }
    out
}

struct PromptIo<R, W> {
    reader: R,
    writer: W,
}

/// `ConsentPrompt` over a line-oriented reader and writer
pub struct TerminalPrompt<R, W> {
    io: Mutex<PromptIo<R, W>>,
    haptic_pause: Duration,
}

impl TerminalPrompt<BufReader<Stdin>, Stdout> {
    /// Prompt on the process's stdin/stdout
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> TerminalPrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new(PromptIo { reader, writer }),
            haptic_pause: Duration::from_millis(500),
        }
    }

    pub fn with_haptic_pause(mut self, pause: Duration) -> Self {
        self.haptic_pause = pause;
        self
    }

    pub fn into_parts(self) -> (R, W) {
        let io = self.io.into_inner();
        (io.reader, io.writer)
    }

    /// Write a message as-is
    pub async fn say(&self, message: &str) -> Result<()> {
        let mut io = self.io.lock().await;
        write_out(&mut io.writer, message).await
    }

    /// Ask until the answer is yes or no. `None` when input ends or the
    /// prompt is interrupted.
    pub async fn ask_yes_no(&self, question: &str) -> Result<Option<bool>> {
        let mut io = self.io.lock().await;
        ask(&mut *io, question).await
    }
}

async fn write_out<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> Result<()> {
    writer
        .write_all(message.as_bytes())
        .await
        .map_err(|e| VcaError::io("<terminal>", e))?;
    writer
        .flush()
        .await
        .map_err(|e| VcaError::io("<terminal>", e))
}

async fn ask<R, W>(io: &mut PromptIo<R, W>, question: &str) -> Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        write_out(&mut io.writer, &format!("  {question} (y/n): ")).await?;

        let mut line = String::new();
        let read = tokio::select! {
            read = io.reader.read_line(&mut line) => {
                read.map_err(|e| VcaError::io("<terminal>", e))?
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("prompt interrupted");
                return Ok(None);
            }
        };

        if read == 0 {
            debug!("input closed before an answer");
            return Ok(None);
        }
        if let Some(answer) = parse_answer(&line) {
            return Ok(Some(answer));
        }
        write_out(&mut io.writer, "  Please enter 'y' or 'n'\n").await?;
    }
}

#[async_trait]
impl<R, W> ConsentPrompt for TerminalPrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request(&self, request: &ConsentRequest) -> Result<ConsentDecision> {
        let mut io = self.io.lock().await;

        write_out(&mut io.writer, &render_request(request)).await?;
        write_out(&mut io.writer, "\n  [HAPTIC_PULSE]\n  ...buzz...\n\n").await?;
        tokio::time::sleep(self.haptic_pause).await;
        write_out(&mut io.writer, &format!("{RULE}\n\n")).await?;

        Ok(match ask(&mut *io, "Approve this action?").await? {
            Some(true) => ConsentDecision::Approved,
            Some(false) => ConsentDecision::Vetoed,
            None => ConsentDecision::Cancelled,
        })
    }
}
