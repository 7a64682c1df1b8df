//! Per-endpoint execution: one in-flight batch at a time, outcome posted to
//! a slot the dispatcher polls.
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::endpoint::{self, TransportError};
use crate::glossary::Term;
use crate::placeholder::PlaceholderSet;
use crate::prompt::{self, GenerationParams};
use crate::script::Entry;
use crate::validate::{self, ValidationError};

/// Why a batch came back unfinished.
#[derive(Debug)]
pub enum FailureKind {
    Transport(String),
    TimedOut,
    CountMismatch { expected: usize, got: usize },
    EmptyLine,
    Degeneration,
}

impl FailureKind {
    /// Transport-class failures never poison an entry; the reply simply
    /// never arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, FailureKind::Transport(_) | FailureKind::TimedOut)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transport(detail) => write!(f, "transport: {detail}"),
            FailureKind::TimedOut => write!(f, "timed out"),
            FailureKind::CountMismatch { expected, got } => {
                write!(f, "count mismatch: expected {expected}, got {got}")
            }
            FailureKind::EmptyLine => write!(f, "empty reply line"),
            FailureKind::Degeneration => write!(f, "degenerate reply"),
        }
    }
}

/// What the dispatcher sees when it locks a worker's slot.
#[derive(Debug)]
pub enum Slot {
    Free,
    Busy,
    DoneOk(Vec<Entry>),
    DoneErr(FailureKind, Vec<Entry>),
}

/// One batch with the context it should be translated under.
pub struct Order {
    pub batch: Vec<Entry>,
    pub history: Vec<Entry>,
}

/// Everything a worker needs that outlives a single batch.
pub struct WorkerConfig {
    pub endpoint: String,
    pub model: String,
    pub params: GenerationParams,
    pub glossary: Arc<Vec<Term>>,
    pub placeholders: PlaceholderSet,
    /// Forward fragments to stdout as they arrive.
    pub echo_stream: bool,
}

/// Handle held by the dispatcher: the order channel plus the result slot.
pub struct Worker {
    pub endpoint: String,
    pub slot: Arc<Mutex<Slot>>,
    orders: mpsc::Sender<Order>,
}

impl Worker {
    /// Spawn the task serving one endpoint. It exits once the dispatcher
    /// drops its handle and the order channel closes.
    pub fn spawn(client: reqwest::Client, config: WorkerConfig) -> Worker {
        let (orders, mut order_rx) = mpsc::channel::<Order>(1);
        let slot = Arc::new(Mutex::new(Slot::Free));
        let endpoint = config.endpoint.clone();

        let task_slot = slot.clone();
        tokio::spawn(async move {
            // Degenerate replies ratchet the frequency penalty up until a
            // batch lands, which resets it.
            let mut penalty_boost = 0.0f32;
            while let Some(order) = order_rx.recv().await {
                let outcome = run_order(&client, &config, penalty_boost, &order).await;
                match &outcome {
                    Ok(_) => penalty_boost = 0.0,
                    Err(FailureKind::Degeneration) if penalty_boost < 0.8 => penalty_boost += 0.1,
                    Err(_) => {}
                }
                *task_slot.lock().await = match outcome {
                    Ok(results) => Slot::DoneOk(results),
                    Err(kind) => Slot::DoneErr(kind, order.batch),
                };
            }
        });

        Worker {
            endpoint,
            slot,
            orders,
        }
    }

    /// Hand a batch over. The caller has already flipped the slot to `Busy`,
    /// and at-most-one-in-flight makes the capacity-1 send immediate.
    pub async fn assign(&self, order: Order) {
        let _ = self.orders.send(order).await;
    }
}

/// Execute one batch: assemble, stream, watch for degeneration, validate.
async fn run_order(
    client: &reqwest::Client,
    config: &WorkerConfig,
    penalty_boost: f32,
    order: &Order,
) -> Result<Vec<Entry>, FailureKind> {
    let user_message = prompt::assemble(
        &order.batch,
        &order.history,
        &config.glossary,
        &config.placeholders,
    );
    // The degeneration gates are sized from the text the model was shown.
    let prompt_chars = user_message.chars().count();
    let mut params = config.params;
    params.frequency_penalty += penalty_boost;

    let mut stream = endpoint::open(
        client,
        &config.endpoint,
        &config.model,
        &user_message,
        params,
    )
    .await
    .map_err(transport_failure)?;

    let mut reply = String::new();
    loop {
        match stream.next_delta().await {
            Ok(Some(piece)) => {
                if config.echo_stream {
                    echo(&piece);
                }
                reply.push_str(&piece);
                if validate::is_degenerate(&reply, prompt_chars) {
                    // Tear the connection down mid-reply.
                    drop(stream);
                    if config.echo_stream {
                        echo("\n");
                    }
                    return Err(FailureKind::Degeneration);
                }
            }
            Ok(None) => break,
            Err(err) => {
                if config.echo_stream {
                    echo("\n");
                }
                return Err(transport_failure(err));
            }
        }
    }
    if config.echo_stream {
        echo("\n");
    }

    match validate::split_reply(&reply, &order.batch, &config.placeholders) {
        Ok(results) => Ok(results),
        Err(ValidationError::CountMismatch { expected, got }) => {
            Err(FailureKind::CountMismatch { expected, got })
        }
        Err(ValidationError::EmptyLine) => Err(FailureKind::EmptyLine),
    }
}

fn transport_failure(err: TransportError) -> FailureKind {
    match err {
        TransportError::TimedOut => FailureKind::TimedOut,
        other => FailureKind::Transport(other.to_string()),
    }
}

/// Forward a fragment to stdout the moment it arrives.
fn echo(piece: &str) {
    let _ = crossterm::execute!(std::io::stdout(), crossterm::style::Print(piece));
}
