//! Shared fixtures for endpoint-facing tests: canned wire bodies and a
//! stand-in model that echoes the prompt's input block back.
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// The template line that introduces the input block; everything after it in
/// the user message is the block itself.
const INPUT_MARKER: &str = "将下面的文本从日文翻译成简体中文：\n";

/// Pull the input block back out of a captured request body.
pub fn input_block_of(request: &Request) -> String {
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    let content = body["messages"][1]["content"].as_str().unwrap();
    let (_, input) = content.rsplit_once(INPUT_MARKER).unwrap();
    input.to_string()
}

/// Number of input lines a captured request carried.
pub fn input_lines_of(request: &Request) -> usize {
    input_block_of(request).lines().count()
}

/// Wrap reply text in the wire frames the streaming client expects.
pub fn sse_body(reply: &str) -> String {
    let delta = serde_json::json!({"choices": [{"delta": {"content": reply}}]});
    let finish = r#"{"choices": [{"finish_reason": "stop", "delta": {"content": ""}}]}"#;
    format!("data: {delta}\n\ndata: {finish}\n\ndata: [DONE]\n")
}

/// A stand-in model: echoes each input line through a substitution map, so
/// placeholder tokens survive untouched.
pub struct EchoTranslator {
    map: Vec<(String, String)>,
}

impl EchoTranslator {
    pub fn translate(&self, input: &str) -> String {
        input
            .lines()
            .map(|line| {
                let mut line = line.to_string();
                for (from, to) in &self.map {
                    line = line.replace(from.as_str(), to);
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Respond for EchoTranslator {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let reply = self.translate(&input_block_of(request));
        ResponseTemplate::new(200).set_body_raw(sse_body(&reply), "text/event-stream")
    }
}

/// Mount an echo translator on a fresh mock server.
pub async fn echo_endpoint(map: &[(&str, &str)]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(EchoTranslator {
            map: map
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        })
        .mount(&server)
        .await;
    server
}
