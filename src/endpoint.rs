//! One streaming chat-completion call against a configured endpoint.
//!
//! The wire is the OpenAI-style streaming shape: a POST returning lines of
//! `data: <json>` frames, closed by a `finish_reason` or a `[DONE]` sentinel.
use eyre::{Result, eyre};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::prompt::{GenerationParams, SYSTEM_PROMPT};


/// Why a call failed before producing a valid reply.
#[derive(Debug)]
pub enum TransportError {
    /// Non-200 status; carries the drained response body.
    Status(u16, String),
    /// Connection, TLS or mid-body read failure.
    Network(reqwest::Error),
    /// A data line that was not valid JSON or lacked `choices[0]`.
    MalformedFrame(String),
    /// The wall-clock timeout elapsed.
    TimedOut,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Status(status, body) => {
                write!(f, "endpoint answered {status}: {body}")
            }
            TransportError::Network(e) => write!(f, "network error: {e}"),
            TransportError::MalformedFrame(line) => write!(f, "malformed stream frame: {line}"),
            TransportError::TimedOut => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::TimedOut
        } else {
            TransportError::Network(err)
        }
    }
}

/// Build the shared HTTP client carrying the wall-clock timeout and the
/// optional proxy. `timeout` bounds each whole call, headers through body.
pub fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url).map_err(|e| eyre!("bad proxy url: {e}"))?);
    }
    builder.build().map_err(|e| eyre!(e))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    n: u32,
    user: &'a str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct StreamFrame {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// An in-flight streaming completion. Dropping it tears down the connection:
/// the pump task fails its next send and lets the response go.
#[derive(Debug)]
pub struct Completion {
    deltas: tokio::sync::mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

impl Completion {
    /// Next text fragment; `None` once the stream has terminated normally.
    pub async fn next_delta(&mut self) -> Result<Option<String>, TransportError> {
        match self.deltas.recv().await {
            Some(Ok(piece)) => Ok(Some(piece)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// POST `{endpoint}/v1/chat/completions` and start parsing the streamed
/// reply. Fails fast on a non-200 status, draining the body into the error.
pub async fn open(
    client: &reqwest::Client,
    endpoint: &str,
    model: &str,
    user_message: &str,
    params: GenerationParams,
) -> Result<Completion, TransportError> {
    let url = format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'));
    let body = ChatRequest {
        model,
        messages: [
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: user_message,
            },
        ],
        stream: true,
        temperature: params.temperature,
        top_p: params.top_p,
        presence_penalty: params.presence_penalty,
        frequency_penalty: params.frequency_penalty,
        n: 1,
        user: "user",
    };

    let response = client.post(&url).json(&body).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status(status.as_u16(), body));
    }

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(pump_frames(response, tx));
    Ok(Completion { deltas: rx })
}

/// One wire line, interpreted.
enum FrameEvent {
    Delta(String),
    Skip,
    Finished,
    Malformed(String),
}

/// Interpret a single line: empty keep-alives, `data: ` frames, `[DONE]`.
fn parse_frame(line: &str) -> FrameEvent {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return FrameEvent::Skip;
    }
    let payload = line.strip_prefix("data: ").unwrap_or(line);
    if payload == "[DONE]" {
        return FrameEvent::Finished;
    }
    let frame: StreamFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(_) => return FrameEvent::Malformed(payload.to_string()),
    };
    let Some(choice) = frame.choices.into_iter().next() else {
        return FrameEvent::Malformed(payload.to_string());
    };
    if choice
        .finish_reason
        .as_deref()
        .is_some_and(|reason| !reason.is_empty())
    {
        return FrameEvent::Finished;
    }
    match choice.delta.content {
        Some(content) if !content.is_empty() => FrameEvent::Delta(content),
        _ => FrameEvent::Skip,
    }
}

/// Read the response body, decode maximal valid UTF-8 prefixes, split into
/// lines and forward text deltas until a finish signal. A dropped receiver
/// ends the pump and with it the connection.
async fn pump_frames(
    response: reqwest::Response,
    deltas: tokio::sync::mpsc::UnboundedSender<Result<String, TransportError>>,
) {
    let mut body = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();
    let mut text = String::new();

    loop {
        let chunk = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                let _ = deltas.send(Err(TransportError::from(err)));
                return;
            }
            None => break,
        };
        pending.extend_from_slice(&chunk);

        // Move the maximal valid UTF-8 prefix over; keep any incomplete tail.
        loop {
            match std::str::from_utf8(&pending) {
                Ok(piece) => {
                    text.push_str(piece);
                    pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if valid > 0 {
                        text.push_str(std::str::from_utf8(&pending[..valid]).unwrap_or_default());
                        pending.drain(..valid);
                        continue;
                    }
                    if err.error_len().is_some() {
                        let _ = deltas.send(Err(TransportError::MalformedFrame(
                            "invalid utf-8 in stream".to_string(),
                        )));
                        return;
                    }
                    // Incomplete codepoint; wait for the next chunk.
                    break;
                }
            }
        }

        // Hand complete lines to the frame parser.
        while let Some(at) = text.find('\n') {
            let line: String = text.drain(..=at).collect();
            match parse_frame(line.trim_end_matches('\n')) {
                FrameEvent::Delta(piece) => {
                    if deltas.send(Ok(piece)).is_err() {
                        return;
                    }
                }
                FrameEvent::Skip => {}
                FrameEvent::Finished => return,
                FrameEvent::Malformed(line) => {
                    let _ = deltas.send(Err(TransportError::MalformedFrame(line)));
                    return;
                }
            }
        }
    }

    // Body ended without a finish signal; flush a final unterminated line.
    if !text.is_empty() {
        match parse_frame(&text) {
            FrameEvent::Delta(piece) => {
                let _ = deltas.send(Ok(piece));
            }
            FrameEvent::Malformed(line) => {
                let _ = deltas.send(Err(TransportError::MalformedFrame(line)));
            }
            FrameEvent::Skip | FrameEvent::Finished => {}
        }
    }
}
