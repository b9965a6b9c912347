//! A full session over the wire protocol with a simulated host.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use toolflow::api::MessengerChatClient;
use toolflow::ide::protocol::{message_types, Envelope, HostResponse, StreamChunk};
use toolflow::ide::Messenger;
use toolflow::types::render_context_items;
use toolflow::{Coordinator, EngineConfig, ToolCallStatus, TurnOutcome};

type Host = Messenger<mpsc::UnboundedSender<Envelope>>;

fn stream_events(host: &Host, request: &Envelope, events: &[Value]) {
    for event in events {
        let chunk = StreamChunk::content(event.clone());
        let reply = Envelope::reply(&request.message_type, &request.message_id, chunk).unwrap();
        host.receive(reply);
    }
    let reply = Envelope::reply(&request.message_type, &request.message_id, StreamChunk::done(None)).unwrap();
    host.receive(reply);
}

fn answer(host: &Host, request: &Envelope, content: Value) {
    let reply = Envelope::reply(
        &request.message_type,
        &request.message_id,
        HostResponse::success(content).unwrap(),
    )
    .unwrap();
    host.receive(reply);
}

#[tokio::test]
async fn test_session_over_messenger() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let config = EngineConfig::default()
        .with_post_retries(1, Duration::from_millis(1))
        .with_stream_poll_interval(Duration::from_millis(2));
    let messenger = Messenger::new(tx, &config);

    let host = messenger.clone();
    let host_task = tokio::spawn(async move {
        let mut seen = Vec::new();
        let mut streams = 0;
        while let Some(request) = rx.recv().await {
            seen.push(request.message_type.clone());
            match request.message_type.as_str() {
                message_types::STREAM_CHAT if streams == 0 => {
                    streams += 1;
                    stream_events(
                        &host,
                        &request,
                        &[
                            json!({"type": "content_delta", "text": "Let me look."}),
                            json!({"type": "tool_call_start", "id": "c1", "name": "read_file", "index": 0}),
                            json!({"type": "tool_call_arguments_delta", "index": 0, "partial_json": "{\"filepath\":"}),
                            json!({"type": "tool_call_arguments_delta", "index": 0, "partial_json": "\"README.md\"}"}),
                            json!({"type": "tool_call_complete", "index": 0}),
                            json!({"type": "message_complete"}),
                        ],
                    );
                }
                message_types::STREAM_CHAT => {
                    stream_events(&host, &request, &[json!({"type": "content_delta", "text": "It is a README."})]);
                    break;
                }
                message_types::EVALUATE_POLICY => {
                    answer(&host, &request, json!({"policy": "allowedWithoutPermission"}));
                }
                message_types::TOOLS_CALL => {
                    answer(
                        &host,
                        &request,
                        json!({"contextItems": [{"name": "README.md", "description": "File", "content": "# Hello"}]}),
                    );
                }
                other => panic!("unexpected request {other}"),
            }
        }
        seen
    });

    let coordinator = Coordinator::new(messenger.clone(), MessengerChatClient::new(messenger), config);
    let outcome = coordinator.submit("what is in the readme?").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    let seen = host_task.await.unwrap();
    assert_eq!(
        seen,
        vec![
            message_types::STREAM_CHAT,
            message_types::EVALUATE_POLICY,
            message_types::TOOLS_CALL,
            message_types::STREAM_CHAT,
        ]
    );

    let state = coordinator.history().find_tool_call("c1").unwrap();
    assert_eq!(state.status, ToolCallStatus::Done);
    assert_eq!(state.parsed_args, json!({"filepath": "README.md"}));
    assert_eq!(render_context_items(state.output.as_deref().unwrap()), "# Hello");

    let history = coordinator.history().snapshot();
    assert_eq!(history.last().unwrap().message.content, "It is a README.");
}
