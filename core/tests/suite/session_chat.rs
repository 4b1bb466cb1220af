use std::sync::Arc;

use core_test_support::Call;
use core_test_support::FakeBackend;
use core_test_support::chat;
use core_test_support::drain_events;
use core_test_support::message;
use core_test_support::project;
use core_test_support::pump_until;
use pretty_assertions::assert_eq;
use ragchat_core::SendPhase;
use ragchat_core::SessionController;
use ragchat_core::SessionNotice;
use ragchat_core::error::RagChatErr;
use ragchat_core::sync_poller::SyncPollerOptions;
use ragchat_protocol::ChatId;
use ragchat_protocol::CreateChatRequest;
use ragchat_protocol::ProjectId;
use ragchat_protocol::Role;
use reqwest::StatusCode;

fn new_session(backend: &Arc<FakeBackend>) -> SessionController {
    SessionController::new(backend.clone(), SyncPollerOptions::default())
}

/// Backend with two chats: `c1` scoped to `p1`, `c2` with history.
async fn session_with_chats() -> (Arc<FakeBackend>, SessionController) {
    let backend = Arc::new(FakeBackend::new());
    backend.add_project(project("p1", "docs"));
    backend.add_project(project("p2", "code"));
    backend.add_chat(chat("c1", "first", &["p1"]));
    backend.add_chat(chat("c2", "second", &[]));
    backend.set_messages(
        &ChatId::new("c2"),
        vec![message("m1", "c2", Role::User, "earlier question")],
    );
    let mut session = new_session(&backend);
    session.load_initial();
    pump_until(&mut session, |s| s.chats().len() == 2 && s.projects().len() == 2).await;
    backend.clear_calls();
    (backend, session)
}

#[tokio::test]
async fn first_send_creates_chat_carrying_held_selection() {
    let backend = Arc::new(FakeBackend::new());
    let reply = backend.script_reply();
    let mut session = new_session(&backend);

    session.toggle_project(ProjectId::new("p1"));
    session.toggle_project(ProjectId::new("p2"));
    session.toggle_project(ProjectId::new("p1"));
    session.toggle_project(ProjectId::new("p1"));
    assert_eq!(
        session.selected_projects(),
        &[ProjectId::new("p2"), ProjectId::new("p1")]
    );

    session.set_input("  What does the indexer do?  ");
    session.send().expect("send accepted");
    assert_eq!(session.phase(), SendPhase::Sending);
    assert_eq!(session.input(), "");

    pump_until(&mut session, |s| s.phase() == SendPhase::Streaming).await;
    assert_eq!(session.active_chat(), Some(ChatId::new("chat-1")));
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].id.is_temporary());
    assert_eq!(messages[0].content, "What does the indexer do?");

    reply.send("data: It \ndata: chunks files");
    reply.send("\n");
    pump_until(&mut session, |s| s.streaming_text() == Some("It chunks files")).await;
    reply.send("data: [DONE]\n");
    drop(reply);
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    let calls = backend.calls();
    assert_eq!(
        calls[0],
        Call::CreateChat(CreateChatRequest {
            title: "What does the indexer do?".to_string(),
            project_ids: vec![ProjectId::new("p2"), ProjectId::new("p1")],
        })
    );
    let association_calls = calls
        .iter()
        .filter(|c| matches!(c, Call::CreateChat(_) | Call::UpdateChatProjects(..)))
        .count();
    assert_eq!(association_calls, 1);

    // Messages were not reloaded on activation, only once the reply ended.
    assert_eq!(
        backend.count_calls(|c| matches!(c, Call::ListMessages(_))),
        1
    );
    assert_eq!(session.streaming_text(), None);
    assert_eq!(session.messages().len(), 1);
    assert!(!session.messages()[0].id.is_temporary());
    assert_eq!(session.chats()[0].id, ChatId::new("chat-1"));
    assert!(session.take_notices().is_empty());
}

#[tokio::test]
async fn chat_title_is_a_prefix_of_the_first_message() {
    let backend = Arc::new(FakeBackend::new());
    let mut session = new_session(&backend);
    let long = "é".repeat(80);
    session.set_input(long);
    session.send().expect("send accepted");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;

    let Call::CreateChat(request) = &backend.calls()[0] else {
        panic!("expected chat creation first");
    };
    assert_eq!(request.title, "é".repeat(50));
}

#[tokio::test]
async fn no_second_send_while_one_is_in_flight() {
    let backend = Arc::new(FakeBackend::new());
    let reply = backend.script_reply();
    let mut session = new_session(&backend);

    session.set_input("one");
    session.send().expect("first send");
    session.set_input("two");
    assert!(matches!(session.send(), Err(RagChatErr::Validation(_))));
    assert_eq!(session.input(), "two");

    pump_until(&mut session, |s| s.phase() == SendPhase::Streaming).await;
    assert!(matches!(session.send(), Err(RagChatErr::Validation(_))));

    reply.send("data: [DONE]\n");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    assert_eq!(backend.count_calls(|c| matches!(c, Call::CreateChat(_))), 1);
    assert_eq!(backend.count_calls(|c| matches!(c, Call::SendMessage(..))), 1);

    session.send().expect("input kept for the next send");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    assert_eq!(backend.count_calls(|c| matches!(c, Call::SendMessage(..))), 2);
}

#[tokio::test]
async fn blank_input_never_reaches_the_backend() {
    let backend = Arc::new(FakeBackend::new());
    let mut session = new_session(&backend);
    session.set_input(" \n\t ");
    assert!(matches!(session.send(), Err(RagChatErr::Validation(_))));
    assert_eq!(session.phase(), SendPhase::Idle);
    drain_events(&mut session).await;
    assert_eq!(backend.calls(), Vec::new());
}

#[tokio::test]
async fn late_tokens_stay_out_of_the_newly_opened_chat() {
    let (backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c1"));
    assert_eq!(session.selected_projects(), &[ProjectId::new("p1")]);

    let reply = backend.script_reply();
    session.set_input("hello");
    session.send().expect("send accepted");
    reply.send("data: early\n");
    pump_until(&mut session, |s| s.streaming_text() == Some("early")).await;

    session.select_chat(ChatId::new("c2"));
    reply.send("data:  late\n");
    drain_events(&mut session).await;

    assert_eq!(session.phase(), SendPhase::Streaming);
    assert_eq!(session.streaming_text(), None);
    let contents: Vec<&str> = session.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["earlier question"]);

    // Back on the chat that owns the reply, the whole buffer is visible.
    session.select_chat(ChatId::new("c1"));
    drain_events(&mut session).await;
    assert_eq!(session.streaming_text(), Some("early late"));

    session.select_chat(ChatId::new("c2"));
    reply.send("data: [DONE]\n");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    // The post-reply reload targets the chat that is open now.
    let c1_loads = backend.count_calls(|c| *c == Call::ListMessages(ChatId::new("c1")));
    let c2_loads = backend.count_calls(|c| *c == Call::ListMessages(ChatId::new("c2")));
    assert_eq!((c1_loads, c2_loads), (2, 3));
    assert_eq!(session.messages()[0].content, "earlier question");

    let Some(Call::SendMessage(chat_id, request)) = backend
        .calls()
        .into_iter()
        .find(|c| matches!(c, Call::SendMessage(..)))
    else {
        panic!("message was not sent");
    };
    assert_eq!(chat_id, ChatId::new("c1"));
    assert_eq!(request.project_ids, vec![ProjectId::new("p1")]);
}

#[tokio::test]
async fn stale_message_loads_are_discarded() {
    let (_backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c2"));
    session.select_chat(ChatId::new("c1"));
    drain_events(&mut session).await;
    assert_eq!(session.active_chat(), Some(ChatId::new("c1")));
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn send_failure_returns_to_idle_without_retry() {
    let (backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c1"));
    backend.fail_send(StatusCode::INTERNAL_SERVER_ERROR);
    session.set_input("will fail");
    session.send().expect("send accepted");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    let notices = session.take_notices();
    assert!(matches!(
        notices.as_slice(),
        [SessionNotice::Error(RagChatErr::Transport(reason))] if reason == "send failed"
    ));
    assert_eq!(session.input(), "");
    assert_eq!(session.streaming_text(), None);
    assert_eq!(backend.count_calls(|c| matches!(c, Call::SendMessage(..))), 1);
}

#[tokio::test]
async fn error_event_is_surfaced_and_partial_reply_dropped() {
    let (backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c1"));
    drain_events(&mut session).await;
    backend.clear_calls();

    backend.script_reply_text("data: partial\ndata: [ERROR] backend crashed\n");
    session.set_input("question");
    session.send().expect("send accepted");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].to_string(), "[ERROR] backend crashed");
    assert!(matches!(&notices[0], SessionNotice::Error(RagChatErr::Protocol(_))));
    assert_eq!(session.streaming_text(), None);
    assert_eq!(backend.count_calls(|c| matches!(c, Call::ListMessages(_))), 0);

    session.set_input("again");
    session.send().expect("usable after a failure");
}

#[tokio::test]
async fn cancelling_a_reply_is_silent() {
    let (backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c1"));
    let reply = backend.script_reply();
    session.set_input("long answer please");
    session.send().expect("send accepted");
    reply.send("data: one\n");
    pump_until(&mut session, |s| s.streaming_text() == Some("one")).await;

    assert!(session.cancel_stream());
    assert_eq!(session.phase(), SendPhase::Idle);
    reply.send("data: two\ndata: [DONE]\n");
    drain_events(&mut session).await;

    assert_eq!(session.streaming_text(), None);
    assert!(session.take_notices().is_empty());
    assert!(!session.cancel_stream());
}

#[tokio::test]
async fn chat_created_for_a_cancelled_send_gets_no_message() {
    let backend = Arc::new(FakeBackend::new());
    let mut session = new_session(&backend);

    session.set_input("one");
    session.send().expect("send accepted");
    assert_eq!(session.phase(), SendPhase::Sending);
    assert!(session.cancel_stream());

    session.set_input("two");
    session.send().expect("send accepted after cancel");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    let sends: Vec<Call> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::SendMessage(..)))
        .collect();
    assert_eq!(sends.len(), 1);
    let Call::SendMessage(chat_id, request) = &sends[0] else {
        unreachable!();
    };
    assert_eq!(request.message, "two");

    let target = session
        .chats()
        .iter()
        .find(|c| c.id == *chat_id)
        .expect("target chat listed");
    assert_eq!(target.title, "two");
    assert_eq!(session.active_chat(), Some(chat_id.clone()));
    assert!(session.take_notices().is_empty());
}

#[tokio::test]
async fn failed_creation_for_a_cancelled_send_is_silent() {
    let backend = Arc::new(FakeBackend::new());
    backend.fail_create_chat(StatusCode::INTERNAL_SERVER_ERROR);
    let mut session = new_session(&backend);

    session.set_input("one");
    session.send().expect("send accepted");
    assert!(session.cancel_stream());
    session.set_input("two");
    session.send().expect("send accepted after cancel");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    assert!(session.take_notices().is_empty());
    assert_eq!(
        backend.count_calls(|c| matches!(c, Call::SendMessage(..))),
        1
    );
}

#[tokio::test]
async fn toggling_with_an_open_chat_persists_immediately() {
    let (backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c1"));
    session.toggle_project(ProjectId::new("p2"));
    session.toggle_project(ProjectId::new("p1"));
    drain_events(&mut session).await;

    let updates: Vec<Call> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::UpdateChatProjects(..)))
        .collect();
    assert_eq!(
        updates,
        vec![
            Call::UpdateChatProjects(
                ChatId::new("c1"),
                vec![ProjectId::new("p1"), ProjectId::new("p2")]
            ),
            Call::UpdateChatProjects(ChatId::new("c1"), vec![ProjectId::new("p2")]),
        ]
    );
    let c1 = session
        .chats()
        .iter()
        .find(|c| c.id == ChatId::new("c1"))
        .expect("c1 listed");
    assert_eq!(c1.project_ids, vec![ProjectId::new("p2")]);
}

#[tokio::test]
async fn deleting_the_open_chat_returns_to_landing() {
    let (backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c2"));
    drain_events(&mut session).await;
    assert_eq!(session.messages().len(), 1);

    session.delete_chat(ChatId::new("c2"));
    pump_until(&mut session, |s| s.chats().len() == 1).await;
    assert_eq!(session.active_chat(), None);
    assert!(session.messages().is_empty());
    assert_eq!(backend.count_calls(|c| matches!(c, Call::DeleteChat(_))), 1);
}

#[tokio::test]
async fn new_chat_then_send_creates_another_chat() {
    let (backend, mut session) = session_with_chats().await;
    session.select_chat(ChatId::new("c1"));
    session.new_chat();
    assert_eq!(session.active_chat(), None);
    assert!(session.messages().is_empty());

    session.set_input("fresh start");
    session.send().expect("send accepted");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;
    drain_events(&mut session).await;

    let Some(Call::CreateChat(request)) = backend
        .calls()
        .into_iter()
        .find(|c| matches!(c, Call::CreateChat(_)))
    else {
        panic!("no chat created");
    };
    // The selection adopted from `c1` carries over to the new chat.
    assert_eq!(request.project_ids, vec![ProjectId::new("p1")]);
    assert_eq!(session.active_chat(), Some(ChatId::new("chat-1")));
}

#[tokio::test]
async fn failed_chat_creation_leaves_session_usable() {
    let backend = Arc::new(FakeBackend::new());
    backend.fail_create_chat(StatusCode::SERVICE_UNAVAILABLE);
    let mut session = new_session(&backend);
    session.set_input("hi");
    session.send().expect("send accepted");
    pump_until(&mut session, |s| s.phase() == SendPhase::Idle).await;

    assert_eq!(session.active_chat(), None);
    assert!(session.messages().is_empty());
    let notices = session.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].to_string(), "create failed");
}
