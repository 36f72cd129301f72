//! Session behavior across crashes: resume from every kind of log tail.

mod common;

use std::io::Write;

use serde_json::json;
use tempfile::TempDir;

use common::*;
use ntn::conversation::{AssistantPayload, ToolStatus, TurnOutcome};
use ntn::errors::{LogError, ProviderError, SessionError};
use ntn::log::{Block, ResumeCursor};
use ntn::provider::MessageContent;
use ntn::session::{DECLINED_OUTPUT, Interrupt, ROUND_LIMIT_ERROR, Session, SessionState};

// =============================================================================
// Resuming mid-turn
// =============================================================================

#[tokio::test]
async fn test_crash_during_tool_execution_dispatches_once() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(
        &path,
        &[
            user("list files"),
            assistant_calls(vec![call("t1", "list_dir", json!({"path": "."}))]),
        ],
    );

    let log = ntn::log::load(&path).unwrap();
    assert_eq!(
        log.cursor,
        ResumeCursor::AwaitingToolResults {
            turn: 1,
            pending: vec!["t1".to_string()],
            answered: vec![],
        }
    );

    let provider = ScriptedProvider::new(vec![Ok(AssistantPayload::text("Two files."))]);
    let tools = ScriptedTools::new();
    let console = ScriptedConsole::new(&[]);
    let mut session = Session::resume(
        log,
        parts(
            provider.clone(),
            tools.clone(),
            console,
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();

    assert_eq!(*session.step().await.unwrap(), SessionState::ExecutingTools);
    assert_eq!(*session.step().await.unwrap(), SessionState::RequestingModel);
    assert_eq!(tools.executions("t1"), 1);
    assert_eq!(*session.step().await.unwrap(), SessionState::AwaitingInput);

    assert_eq!(
        kinds(&path),
        vec!["SESSION", "USER", "ASSISTANT", "TOOL_RESULT", "ASSISTANT", "END_TURN"]
    );

    // The model sees the result of the call it made before the crash.
    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let last = requests[0].messages.last().unwrap();
    assert!(last.content.iter().any(|c| matches!(
        c,
        MessageContent::ToolResult { tool_use_id, .. } if tool_use_id == "t1"
    )));
}

#[tokio::test]
async fn test_partially_answered_round_runs_only_missing_calls() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(
        &path,
        &[
            user("check both"),
            assistant_calls(vec![command("c1", "ls"), command("c2", "pwd")]),
            Block::ToolResult {
                results: vec![ntn::conversation::ToolResult::ok("c1", "a.txt")],
            },
        ],
    );

    let log = ntn::log::load(&path).unwrap();
    assert_eq!(
        log.cursor,
        ResumeCursor::AwaitingToolResults {
            turn: 1,
            pending: vec!["c2".to_string()],
            answered: vec!["c1".to_string()],
        }
    );

    let provider = ScriptedProvider::new(vec![Ok(AssistantPayload::text("Done."))]);
    let tools = ScriptedTools::new();
    let session = Session::resume(
        log,
        parts(
            provider.clone(),
            tools.clone(),
            ScriptedConsole::new(&[]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    session.run().await.unwrap();

    assert_eq!(tools.executions("c1"), 0);
    assert_eq!(tools.executions("c2"), 1);

    let replayed = ntn::log::load(&path).unwrap();
    assert!(replayed.cursor.is_idle());
    let round = &replayed.turns[0].rounds[0];
    assert!(round.is_complete());
    assert_eq!(round.results[0].output, "a.txt");
}

#[tokio::test]
async fn test_durable_user_message_is_sent_to_model() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(&path, &[user("hello")]);

    let log = ntn::log::load(&path).unwrap();
    assert_eq!(log.cursor, ResumeCursor::AwaitingModel { turn: 1 });

    let provider = ScriptedProvider::new(vec![Ok(AssistantPayload::text("Hi."))]);
    let mut session = Session::resume(
        log,
        parts(
            provider.clone(),
            ScriptedTools::new(),
            ScriptedConsole::new(&[]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();

    assert_eq!(*session.step().await.unwrap(), SessionState::RequestingModel);
    assert_eq!(*session.step().await.unwrap(), SessionState::AwaitingInput);
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(kinds(&path), vec!["SESSION", "USER", "ASSISTANT", "END_TURN"]);
}

#[tokio::test]
async fn test_missing_end_marker_closes_turn_without_model_call() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(&path, &[user("hello"), assistant_text("Hi.")]);

    let log = ntn::log::load(&path).unwrap();
    assert_eq!(log.cursor, ResumeCursor::AwaitingTurnEnd { turn: 1 });

    let provider = ScriptedProvider::new(vec![]);
    let mut session = Session::resume(
        log,
        parts(
            provider.clone(),
            ScriptedTools::new(),
            ScriptedConsole::new(&[]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();

    assert_eq!(*session.step().await.unwrap(), SessionState::AwaitingInput);
    assert!(provider.requests().is_empty());
    assert_eq!(kinds(&path), vec!["SESSION", "USER", "ASSISTANT", "END_TURN"]);
    assert_eq!(
        session.turns()[0].outcome,
        Some(TurnOutcome::Completed)
    );
}

// =============================================================================
// Log integrity
// =============================================================================

#[tokio::test]
async fn test_resume_of_idle_log_appends_nothing() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(&path, &[user("hello"), assistant_text("Hi."), end_turn()]);
    let before = std::fs::read(&path).unwrap();

    let log = ntn::log::load(&path).unwrap();
    let turns = log.turns.clone();
    assert!(log.cursor.is_idle());

    let session = Session::resume(
        log,
        parts(
            ScriptedProvider::new(vec![]),
            ScriptedTools::new(),
            ScriptedConsole::new(&[]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    assert_eq!(session.run().await.unwrap(), Some(path.clone()));

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(ntn::log::load(&path).unwrap().turns, turns);
}

#[tokio::test]
async fn test_torn_tail_is_cut_before_appending() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(&path, &[user("hello"), assistant_text("Hi."), end_turn()]);
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"seq":5,"ts":"2026-01-01T00:00:00Z","kind":"USER","te"#)
            .unwrap();
    }

    let log = ntn::log::load(&path).unwrap();
    assert!(log.truncation.is_some());
    assert_eq!(log.turns.len(), 1);

    let console = ScriptedConsole::new(&["again"]);
    let session = Session::resume(
        log,
        parts(
            ScriptedProvider::new(vec![Ok(AssistantPayload::text("Hi again."))]),
            ScriptedTools::new(),
            console.clone(),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    session.run().await.unwrap();

    // Every line parses, so the torn fragment is gone.
    assert_eq!(
        kinds(&path),
        vec!["SESSION", "USER", "ASSISTANT", "END_TURN", "USER", "ASSISTANT", "END_TURN"]
    );
    let replayed = ntn::log::load(&path).unwrap();
    assert!(replayed.truncation.is_none());
    assert_eq!(replayed.turns.len(), 2);
    assert!(
        console
            .events()
            .iter()
            .any(|e| matches!(e, ntn::session::SessionEvent::Warning(_)))
    );
}

#[tokio::test]
async fn test_blocks_after_corrupted_line_are_preserved() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(&path, &[user("hello"), assistant_text("Hi."), end_turn()]);
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{garbage}\n").unwrap();
        file.write_all(
            br#"{"seq":5,"ts":"2026-01-01T00:00:00Z","kind":"USER","text":"two"}"#,
        )
        .unwrap();
        file.write_all(b"\n").unwrap();
    }

    let log = ntn::log::load(&path).unwrap();
    assert_eq!(log.truncation.as_ref().unwrap().line, 5);
    assert_eq!(log.turns.len(), 1);

    let console = ScriptedConsole::new(&["again"]);
    let session = Session::resume(
        log,
        parts(
            ScriptedProvider::new(vec![Ok(AssistantPayload::text("Hi again."))]),
            ScriptedTools::new(),
            console.clone(),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    session.run().await.unwrap();

    let sidecar = ntn::log::untrusted_tail_path(&path);
    let kept = std::fs::read_to_string(&sidecar).unwrap();
    assert_eq!(kept.lines().count(), 2);
    assert!(kept.contains(r#""text":"two""#));

    let replayed = ntn::log::load(&path).unwrap();
    assert!(replayed.truncation.is_none());
    assert_eq!(replayed.turns.len(), 2);
    assert!(console.events().iter().any(|e| matches!(
        e,
        ntn::session::SessionEvent::Warning(text) if text.contains(".untrusted")
    )));
}

#[tokio::test]
async fn test_live_log_cannot_be_resumed_twice() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    write_log(&path, &[user("hello"), assistant_text("Hi."), end_turn()]);

    let first = Session::resume(
        ntn::log::load(&path).unwrap(),
        parts(
            ScriptedProvider::new(vec![]),
            ScriptedTools::new(),
            ScriptedConsole::new(&[]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();

    let second = Session::resume(
        ntn::log::load(&path).unwrap(),
        parts(
            ScriptedProvider::new(vec![]),
            ScriptedTools::new(),
            ScriptedConsole::new(&[]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    );
    assert!(matches!(
        second,
        Err(SessionError::LogWrite {
            source: LogError::Locked { .. },
            ..
        })
    ));
    drop(first);
}

// =============================================================================
// Turn outcomes
// =============================================================================

#[tokio::test]
async fn test_declined_call_is_recorded_as_refused() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    let provider = ScriptedProvider::new(vec![
        Ok(AssistantPayload::tool_calls(
            Some("Cleaning up."),
            vec![command("c1", "rm -rf build")],
        )),
        Ok(AssistantPayload::text("Understood, leaving it.")),
    ]);
    let tools = ScriptedTools::guarding(&["execute_command"]);
    let console = ScriptedConsole::with_answers(&["clean up"], &[false]);

    let session = Session::start(
        &path,
        header(),
        parts(
            provider.clone(),
            tools.clone(),
            console,
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    session.run().await.unwrap();

    assert_eq!(tools.executions("c1"), 0);
    let log = ntn::log::load(&path).unwrap();
    let result = &log.turns[0].rounds[0].results[0];
    assert_eq!(result.status, ToolStatus::Refused);
    assert_eq!(result.output, DECLINED_OUTPUT);
    assert_eq!(log.turns[0].outcome, Some(TurnOutcome::Completed));
}

#[tokio::test]
async fn test_approved_call_runs() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    let provider = ScriptedProvider::new(vec![
        Ok(AssistantPayload::tool_calls(None, vec![command("c1", "make")])),
        Ok(AssistantPayload::text("Built.")),
    ]);
    let tools = ScriptedTools::guarding(&["execute_command"]);

    let session = Session::start(
        &path,
        header(),
        parts(
            provider,
            tools.clone(),
            ScriptedConsole::with_answers(&["build it"], &[true]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    session.run().await.unwrap();

    assert_eq!(tools.executions("c1"), 1);
    let log = ntn::log::load(&path).unwrap();
    assert_eq!(log.turns[0].rounds[0].results[0].status, ToolStatus::Ok);
}

#[tokio::test]
async fn test_round_limit_fails_the_turn() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    let provider = ScriptedProvider::new(vec![
        Ok(AssistantPayload::tool_calls(None, vec![command("c1", "ls")])),
        Ok(AssistantPayload::tool_calls(None, vec![command("c2", "ls")])),
        Ok(AssistantPayload::tool_calls(None, vec![command("c3", "ls")])),
    ]);
    let tools = ScriptedTools::new();
    let mut session_parts = parts(
        provider.clone(),
        tools.clone(),
        ScriptedConsole::new(&["loop forever"]),
        roomy_compactor(),
        Interrupt::new(),
    );
    session_parts.options.max_rounds_per_turn = 2;

    let session = Session::start(&path, header(), session_parts).unwrap();
    session.run().await.unwrap();

    assert_eq!(provider.requests().len(), 2);
    assert_eq!(tools.total_executions(), 2);
    let log = ntn::log::load(&path).unwrap();
    assert_eq!(
        log.turns[0].outcome,
        Some(TurnOutcome::Failed {
            error: ROUND_LIMIT_ERROR.to_string()
        })
    );
    assert!(log.cursor.is_idle());
}

#[tokio::test]
async fn test_provider_failure_ends_turn_and_session_continues() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::Fatal {
            status: Some(400),
            message: "bad request".to_string(),
        }),
        Ok(AssistantPayload::text("Fine now.")),
    ]);

    let session = Session::start(
        &path,
        header(),
        parts(
            provider.clone(),
            ScriptedTools::new(),
            ScriptedConsole::new(&["first", "second"]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    session.run().await.unwrap();

    let log = ntn::log::load(&path).unwrap();
    assert!(matches!(
        log.turns[0].outcome,
        Some(TurnOutcome::Failed { .. })
    ));
    assert_eq!(log.turns[1].outcome, Some(TurnOutcome::Completed));

    // The failed turn has no reply, so both user messages merge into one.
    let requests = provider.requests();
    assert_eq!(requests[1].messages.len(), 1);
}

#[tokio::test]
async fn test_interrupt_during_tools_records_placeholders() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    let interrupt = Interrupt::new();
    let provider = ScriptedProvider::new(vec![Ok(AssistantPayload::tool_calls(
        None,
        vec![command("c1", "sleep 600")],
    ))]);
    let tools = ScriptedTools::hanging_on("c1", interrupt.clone());
    let console = ScriptedConsole::new(&["wait a while"]);

    let session = Session::start(
        &path,
        header(),
        parts(
            provider.clone(),
            tools.clone(),
            console.clone(),
            roomy_compactor(),
            interrupt.clone(),
        ),
    )
    .unwrap();
    session.run().await.unwrap();

    assert_eq!(tools.executions("c1"), 1);
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(
        kinds(&path),
        vec!["SESSION", "USER", "ASSISTANT", "TOOL_RESULT", "END_TURN"]
    );

    let log = ntn::log::load(&path).unwrap();
    let result = &log.turns[0].rounds[0].results[0];
    assert_eq!(result.status, ToolStatus::Error);
    assert!(result.output.contains("interrupted"));
    assert_eq!(log.turns[0].outcome, Some(TurnOutcome::Interrupted));
    assert!(
        console
            .events()
            .contains(&ntn::session::SessionEvent::TurnInterrupted)
    );
}

// =============================================================================
// Termination
// =============================================================================

#[tokio::test]
async fn test_empty_session_log_is_removed() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());

    let session = Session::start(
        &path,
        header(),
        parts(
            ScriptedProvider::new(vec![]),
            ScriptedTools::new(),
            ScriptedConsole::new(&["exit"]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();
    assert!(path.exists());

    assert_eq!(session.run().await.unwrap(), None);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_session_with_completed_turn_keeps_its_log() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());

    let session = Session::start(
        &path,
        header(),
        parts(
            ScriptedProvider::new(vec![Ok(AssistantPayload::text("Hi."))]),
            ScriptedTools::new(),
            ScriptedConsole::new(&["hello", "quit"]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();

    assert_eq!(session.run().await.unwrap(), Some(path.clone()));
    assert!(path.exists());
}

#[tokio::test]
async fn test_exit_command_ignores_case() {
    let dir = TempDir::new().unwrap();
    let path = log_path(dir.path());
    let provider = ScriptedProvider::new(vec![Ok(AssistantPayload::text("Hi."))]);

    let session = Session::start(
        &path,
        header(),
        parts(
            provider.clone(),
            ScriptedTools::new(),
            ScriptedConsole::new(&["hello", "EXIT", "never sent"]),
            roomy_compactor(),
            Interrupt::new(),
        ),
    )
    .unwrap();

    assert_eq!(session.run().await.unwrap(), Some(path.clone()));
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(kinds(&path), vec!["SESSION", "USER", "ASSISTANT", "END_TURN"]);
}
