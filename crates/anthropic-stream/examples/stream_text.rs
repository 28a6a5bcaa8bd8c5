use anthropic_stream::prelude::*;
use futures::StreamExt as _;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    anthropic_stream::init_tracing();

    let client = Client::from_env()?;
    let mut stream = client
        .messages("claude-3-5-haiku-latest")
        .system_prompt("Reply in one short paragraph.")
        .user_text("Stream a greeting.")
        .max_tokens(256)
        .start_stream()?;

    while let Some(item) = stream.next().await {
        match item? {
            Chunk::Error(err) => eprintln!("\nskipped event: {err}"),
            Chunk::MessageDelta {
                usage: Some(usage), ..
            } => eprintln!("\n[output tokens: {}]", usage.output_tokens),
            Chunk::MessageStop => println!(),
            chunk => {
                if let Some(text) = chunk.text_delta() {
                    print!("{text}");
                }
            }
        }
    }
    Ok(())
}
