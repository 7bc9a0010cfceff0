use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use social_dispatch::answer::builtin::{EchoModule, StaticModule};
use social_dispatch::config::DispatcherConfig;
use social_dispatch::dispatch::{Dispatcher, Master, Message, best};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = DispatcherConfig::from_env()?;
    let master = Master::new(
        std::env::var("SOCIAL_DISPATCH_MASTER_HANDLE").unwrap_or_else(|_| "bot".to_string()),
    );

    let dispatcher = Dispatcher::new(config)?;
    dispatcher.register_module(Arc::new(EchoModule::new(0.6)));
    dispatcher.register_module(Arc::new(
        StaticModule::new("canned")
            .with_answer(0.4, "interesting!")
            .with_answer(0.2, "tell me more"),
    ));

    eprintln!("🤖 Social Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Master: {}", master.mention());
    eprintln!("   {}", dispatcher.to_string().replace('\n', "\n   "));
    eprintln!("   Enter `<author_handle> <text>` per line. Ctrl-D to exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut seq: u64 = 0;

    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let Some((handle, text)) = line.split_once(' ') else {
            if !line.is_empty() {
                eprintln!("expected `<author_handle> <text>`");
            }
            eprint!("> ");
            continue;
        };

        seq += 1;
        let message = Message::new(seq.to_string(), text, handle, handle);

        if !dispatcher.may_respond(&message, &master) {
            eprintln!("(staying quiet)");
            eprint!("> ");
            continue;
        }

        let answers = dispatcher.dispatch(&message, &master).await?;
        for answer in &answers {
            println!("{}", serde_json::to_string(answer)?);
        }
        if let Some(top) = best(&answers) {
            eprintln!("→ {}", top.text);
        }
        eprint!("> ");
    }

    Ok(())
}
