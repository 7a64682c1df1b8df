#![cfg(test)]

use super::*;
use crate::endpoint;
use crate::placeholder::PlaceholderSet;
use crate::prompt::GenerationParams;
use crate::testing;
use crate::worker::WorkerConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn entry(index: usize, source: &str) -> Entry {
    Entry {
        index,
        source: source.to_string(),
        speaker: None,
        target: None,
        target_speaker: None,
    }
}

fn placeholders() -> PlaceholderSet {
    PlaceholderSet {
        newline: "<NL-1>".to_string(),
        quote_open: "<QS-2>".to_string(),
        quote_close: "<QE-3>".to_string(),
    }
}

fn worker_for(uri: &str) -> Worker {
    let client = endpoint::build_client(Duration::from_secs(5), None).unwrap();
    Worker::spawn(
        client,
        WorkerConfig {
            endpoint: uri.to_string(),
            model: "sakura".to_string(),
            params: GenerationParams {
                temperature: 0.3,
                top_p: 0.8,
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
            },
            glossary: Arc::new(Vec::new()),
            placeholders: placeholders(),
            echo_stream: false,
        },
    )
}

fn dispatcher(pending: Vec<Entry>, batch_size: usize) -> Dispatcher {
    Dispatcher::new(
        pending,
        &DispatchConfig {
            batch_size,
            history_size: 2,
            tick: Duration::from_millis(10),
        },
        Arc::new(Vec::new()),
        Arc::new(AtomicBool::new(false)),
    )
}

/// A model that merges the first two lines of any batch longer than two,
/// producing one reply line too few.
struct MergingTranslator;

impl Respond for MergingTranslator {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let input = testing::input_block_of(request);
        let lines: Vec<&str> = input.lines().collect();
        let reply = if lines.len() > 2 {
            let mut merged = vec![format!("{}{}", lines[0], lines[1])];
            merged.extend(lines[2..].iter().map(|line| line.to_string()));
            merged.join("\n")
        } else {
            input
        };
        ResponseTemplate::new(200).set_body_raw(testing::sse_body(&reply), "text/event-stream")
    }
}

/// Serves a fixed first response, then echoes every later batch.
struct OnceThenEcho {
    first: ResponseTemplate,
    used: std::sync::atomic::AtomicBool,
}

impl OnceThenEcho {
    fn new(first: ResponseTemplate) -> Self {
        Self {
            first,
            used: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl Respond for OnceThenEcho {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if !self.used.swap(true, Ordering::SeqCst) {
            return self.first.clone();
        }
        let input = testing::input_block_of(request);
        ResponseTemplate::new(200).set_body_raw(testing::sse_body(&input), "text/event-stream")
    }
}

async fn mount(server: &MockServer, responder: impl Respond + 'static) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(responder)
        .mount(server)
        .await;
}

#[tokio::test]
async fn count_mismatch_halves_the_batch_until_it_fits() {
    let server = MockServer::start().await;
    mount(&server, MergingTranslator).await;

    let pending: Vec<Entry> = (0..8).map(|i| entry(i, &format!("行{i}"))).collect();
    let workers = [worker_for(&server.uri())];
    let outcome = dispatcher(pending, 4).run(&workers).await;

    assert_eq!(outcome.done.len(), 8);
    assert!(outcome.excluded.is_empty());
    let indices: Vec<usize> = outcome.done.iter().map(|e| e.index).collect();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());

    // Every 4-entry attempt fails, the halved retries land, and each success
    // resets the batch size to its configured value.
    let sizes: Vec<usize> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(testing::input_lines_of)
        .collect();
    assert_eq!(sizes, vec![4, 2, 4, 2, 4, 2, 2]);
}

#[tokio::test]
async fn empty_line_requeues_without_shrinking_the_batch() {
    let server = MockServer::start().await;
    let first = ResponseTemplate::new(200)
        .set_body_raw(testing::sse_body("\n好"), "text/event-stream");
    mount(&server, OnceThenEcho::new(first)).await;

    let pending = vec![entry(0, "甲"), entry(1, "乙")];
    let workers = [worker_for(&server.uri())];
    let outcome = dispatcher(pending, 2).run(&workers).await;

    assert_eq!(outcome.done.len(), 2);
    let sizes: Vec<usize> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(testing::input_lines_of)
        .collect();
    assert_eq!(sizes, vec![2, 2]);
}

#[tokio::test]
async fn transport_failure_retries_with_the_same_batch_size() {
    let server = MockServer::start().await;
    mount(&server, OnceThenEcho::new(ResponseTemplate::new(500))).await;

    let pending: Vec<Entry> = (0..4).map(|i| entry(i, &format!("行{i}"))).collect();
    let workers = [worker_for(&server.uri())];
    let outcome = dispatcher(pending, 4).run(&workers).await;

    assert_eq!(outcome.done.len(), 4);
    let sizes: Vec<usize> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(testing::input_lines_of)
        .collect();
    assert_eq!(sizes, vec![4, 4]);
}

#[tokio::test]
async fn degenerate_single_entry_is_excluded_not_retried() {
    let server = MockServer::start().await;
    let junk = "哈".repeat(300);
    mount(
        &server,
        move |_: &Request| {
            ResponseTemplate::new(200).set_body_raw(testing::sse_body(&junk), "text/event-stream")
        },
    )
    .await;

    let pending = vec![entry(0, "短い")];
    let workers = [worker_for(&server.uri())];
    let outcome = dispatcher(pending, 1).run(&workers).await;

    assert!(outcome.done.is_empty());
    assert_eq!(outcome.excluded.len(), 1);
    assert_eq!(outcome.excluded[0].index, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn two_endpoints_share_the_load() {
    let left = testing::echo_endpoint(&[]).await;
    let right = testing::echo_endpoint(&[]).await;

    let pending: Vec<Entry> = (0..20).map(|i| entry(i, &format!("文{i}"))).collect();
    let workers = [worker_for(&left.uri()), worker_for(&right.uri())];
    let outcome = dispatcher(pending, 5).run(&workers).await;

    assert_eq!(outcome.done.len(), 20);
    let mut indices: Vec<usize> = outcome.done.iter().map(|e| e.index).collect();
    assert_eq!(indices, (0..20).collect::<Vec<_>>());
    indices.dedup();
    assert_eq!(indices.len(), 20);

    assert!(!left.received_requests().await.unwrap().is_empty());
    assert!(!right.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn completed_translations_feed_the_next_history_window() {
    let server = testing::echo_endpoint(&[]).await;

    let pending: Vec<Entry> = (0..4).map(|i| entry(i, &format!("句{i}"))).collect();
    let workers = [worker_for(&server.uri())];
    let outcome = dispatcher(pending, 2).run(&workers).await;
    assert_eq!(outcome.done.len(), 4);

    let requests = server.received_requests().await.unwrap();
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let content = second["messages"][1]["content"].as_str().unwrap();
    assert!(content.contains("历史翻译：句0<SEP>句1"));
}

#[tokio::test]
async fn repeated_entries_are_served_from_the_memo() {
    let server = testing::echo_endpoint(&[("同じ", "一样")]).await;

    let pending = vec![entry(0, "同じ"), entry(1, "同じ")];
    let workers = [worker_for(&server.uri())];
    let outcome = dispatcher(pending, 1).run(&workers).await;

    assert_eq!(outcome.done.len(), 2);
    assert_eq!(outcome.done[0].target.as_deref(), Some("一样"));
    assert_eq!(outcome.done[1].target.as_deref(), Some("一样"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn an_interrupt_before_assignment_stops_the_file() {
    let server = testing::echo_endpoint(&[]).await;

    let interrupt = Arc::new(AtomicBool::new(true));
    let pending = vec![entry(0, "甲"), entry(1, "乙")];
    let dispatcher = Dispatcher::new(
        pending,
        &DispatchConfig {
            batch_size: 2,
            history_size: 2,
            tick: Duration::from_millis(10),
        },
        Arc::new(Vec::new()),
        interrupt,
    );
    let workers = [worker_for(&server.uri())];
    let outcome = dispatcher.run(&workers).await;

    assert!(outcome.done.is_empty());
    assert!(outcome.excluded.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}
