use super::*;
use crate::api::AiResponse;
use crate::utils::test_utils::{
    create_test_messages, create_test_orchestrator, seed_messages, ScriptedAiClient, TestOrchestrator,
};

fn manager(test: &TestOrchestrator) -> CommandManager {
    CommandManager::with_default_limit(Arc::clone(test.orchestrator.bus()))
}

fn executed(result: CommandResult) -> CommandOutput {
    match result {
        CommandResult::Executed(output) => output,
        CommandResult::ProcessAsMessage(text) => panic!("expected a command, got message {text:?}"),
    }
}

#[test]
fn args_split_on_whitespace_and_keep_the_tail() {
    let args = CommandArgs::new("  5   Tell me   in French ");
    assert_eq!(args.arg(0), Some("5"));
    assert_eq!(args.arg(1), Some("Tell"));
    assert_eq!(args.rest_from(1), Some("Tell me   in French"));
    assert_eq!(args.rest_from(6), None);
    assert!(CommandArgs::new("   ").is_empty());
}

#[test]
fn registry_lookup_ignores_case() {
    assert_eq!(find_command("Switch-Model").map(|entry| entry.name), Some("switch-model"));
    assert!(find_command("provider").is_none());
    assert!(all_commands().iter().all(|entry| entry.usage.starts_with('/')));
}

#[tokio::test]
async fn plain_text_is_not_a_command() {
    let test = create_test_orchestrator(ScriptedAiClient::new());
    let commands = manager(&test);
    let result = commands
        .process_input(&test.orchestrator, "hello there")
        .await
        .expect("process");
    assert!(matches!(result, CommandResult::ProcessAsMessage(ref text) if text == "hello there"));
    assert!(matches!(
        commands.process_input(&test.orchestrator, "/nope").await,
        Err(CommandError::Unknown(ref name)) if name == "nope"
    ));
}

#[tokio::test]
async fn regenerate_and_undo_restores_previous_content() {
    let ai = ScriptedAiClient::new();
    ai.respond(AiResponse::chat("Paris."));
    let test = create_test_orchestrator(ai);
    let chat = &test.orchestrator;
    let ids = seed_messages(chat.state(), create_test_messages());
    let commands = manager(&test);

    let output = executed(
        commands
            .process_input(chat, "/regenerate 5")
            .await
            .expect("regenerate"),
    );
    assert_eq!(output.message, "Regenerated message 5");
    assert_eq!(chat.state().get(&ids[5]).expect("reply").content, "Paris.");
    assert_eq!(commands.history().len(), 1);

    let undone = commands.undo_last_command(chat).await.expect("undo");
    assert_eq!(undone.command_name, "regenerate");
    assert_eq!(
        chat.state().get(&ids[5]).expect("reply").content,
        "The capital of France is Paris."
    );
    assert!(commands.history().is_empty());
    assert_eq!(chat.bus().events_of_type(events::COMMAND_UNDONE).len(), 1);
}

#[tokio::test]
async fn regenerate_with_override_sends_the_new_question() {
    let ai = ScriptedAiClient::new();
    ai.respond(AiResponse::chat("La capitale est Paris."));
    let test = create_test_orchestrator(ai);
    let chat = &test.orchestrator;
    let ids = seed_messages(chat.state(), create_test_messages());
    let commands = manager(&test);

    commands
        .process_input(chat, "/regenerate 5 Tell me in French")
        .await
        .expect("regenerate");
    assert_eq!(test.ai.chat_requests()[0].messages[4].content, "Tell me in French");
    assert_eq!(chat.state().get(&ids[4]).expect("question").content, "Tell me in French");

    // Undo reverts the reworded question along with the reply.
    commands.undo_last_command(chat).await.expect("undo");
    assert_eq!(
        chat.state().get(&ids[4]).expect("question").content,
        "What is the capital of France?"
    );
    assert_eq!(
        chat.state().get(&ids[5]).expect("reply").content,
        "The capital of France is Paris."
    );
}

#[tokio::test]
async fn skipped_regenerations_are_reported() {
    let test = create_test_orchestrator(ScriptedAiClient::new());
    let chat = &test.orchestrator;
    seed_messages(chat.state(), create_test_messages());
    let commands = manager(&test);

    assert!(matches!(
        commands.process_input(chat, "/regenerate 4").await,
        Err(CommandError::Rejected(_))
    ));
    assert!(matches!(
        commands.process_input(chat, "/regenerate x").await,
        Err(CommandError::Usage(_))
    ));
    assert!(commands.history().is_empty());
    assert_eq!(test.ai.call_count(), 0);
}

#[tokio::test]
async fn edit_and_undo() {
    let test = create_test_orchestrator(ScriptedAiClient::new());
    let chat = &test.orchestrator;
    let ids = seed_messages(chat.state(), create_test_messages());
    let commands = manager(&test);

    commands
        .process_input(chat, "/edit 0 Hello again")
        .await
        .expect("edit");
    assert_eq!(chat.state().get(&ids[0]).expect("user").content, "Hello again");
    assert!(!chat.editing().is_editing(&ids[0]));

    commands.undo_last_command(chat).await.expect("undo");
    assert_eq!(chat.state().get(&ids[0]).expect("user").content, "Hello");
}

#[tokio::test]
async fn switch_model_undo_restores_the_previous_model() {
    let test = create_test_orchestrator(ScriptedAiClient::new());
    let chat = &test.orchestrator;
    let commands = manager(&test);

    commands
        .process_input(chat, "/switch-model gpt-4o")
        .await
        .expect("switch");
    assert_eq!(chat.models().active_model_id(), "gpt-4o");
    commands
        .process_input(chat, "/help")
        .await
        .expect("help");

    // Help is not undoable, so undo reaches past it.
    let undone = commands.undo_last_command(chat).await.expect("undo");
    assert_eq!(undone.command_name, "switch-model");
    assert_eq!(chat.models().active_model_id(), "gpt-4o-mini");
    assert!(matches!(
        commands.undo_last_command(chat).await,
        Err(CommandError::NothingToUndo)
    ));
}

#[tokio::test]
async fn history_is_bounded() {
    let test = create_test_orchestrator(ScriptedAiClient::new());
    let chat = &test.orchestrator;
    let mut config = crate::core::config::Config::default();
    config.command_history_limit = 2;
    let commands = CommandManager::from_config(Arc::clone(chat.bus()), &config);

    for model in ["gpt-4o", "gpt-4o-mini", "o3-mini"] {
        commands
            .execute(chat, "switch-model", CommandArgs::new(model))
            .await
            .expect("switch");
    }
    let names: Vec<String> = commands
        .history()
        .iter()
        .map(|record| record.args.raw.clone())
        .collect();
    assert_eq!(names, vec!["gpt-4o-mini", "o3-mini"]);
    assert_eq!(chat.bus().events_of_type(events::COMMAND_EXECUTED).len(), 3);
}
