use anthropic_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    anthropic_stream::init_tracing();

    let message = Client::from_env()?
        .messages("claude-3-5-haiku-latest")
        .system_prompt("Answer briefly.")
        .user_text("Say hello")
        .collect_message()
        .await?;

    println!("{}", message.text());
    eprintln!(
        "stop_reason={:?} input_tokens={} output_tokens={}",
        message.stop_reason, message.usage.input_tokens, message.usage.output_tokens
    );
    Ok(())
}
