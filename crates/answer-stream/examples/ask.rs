use std::io::Write as _;

use answer_stream::observability::init_observability;
use answer_stream::prelude::*;

/// Streams one answer to stdout.
///
/// ```text
/// ANSWER_STREAM_ENDPOINT=http://localhost:8000/chat cargo run --example ask -- "Xin chào"
/// ```
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), EngineError> {
    init_observability();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        return Err(EngineError::Validation("usage: ask <question>".into()));
    }

    let engine = Engine::from_env()?;
    let mut conversation = engine.conversation(ConversationConfig::named("ask"));
    let mut answer = conversation.submit(question).await?;

    let mut stdout = std::io::stdout();
    while let Some(event) = answer.next_event().await {
        match event {
            StreamEvent::Delta { text, .. } => {
                print!("{text}");
                let _ = stdout.flush();
            }
            StreamEvent::Completed { .. } => println!(),
            StreamEvent::Failed {
                failure, partial, ..
            } => {
                if !partial.is_empty() {
                    println!();
                }
                eprintln!("answer failed: {}", failure.reason());
            }
            StreamEvent::Cancelled { .. } => eprintln!("answer cancelled"),
            StreamEvent::Started { .. } => {}
        }
    }

    let text = answer.finish().await?;
    conversation.record_answer(text);
    Ok(())
}
