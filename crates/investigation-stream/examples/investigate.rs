//! Start an investigation and print its events as they arrive.
//!
//! ```text
//! cargo run -p investigation-stream --example investigate -- \
//!     --kubecontext kind-dev "why is checkout-api crashlooping?"
//! ```

use clap::Parser;
use investigation_stream::init_observability;
use investigation_stream::prelude::*;

#[derive(Debug, Parser)]
#[command(about = "Start an investigation and follow its event stream")]
struct Args {
    /// Question to investigate.
    prompt: String,
    /// Server base URL; defaults to INVESTIGATION_API_BASE_URL or the local server.
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    kubecontext: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Keep reading the initiating connection instead of re-subscribing.
    #[arg(long)]
    keep_open: bool,
}

fn print_event(event: &EventEnvelope) {
    match event.kind {
        EventKind::Content | EventKind::TitleToken => {
            print!("{}", event.text().unwrap_or_default());
        }
        EventKind::ToolCall | EventKind::ToolOutput => {}
        kind => {
            let summary = ["title", "content", "message", "root_cause"]
                .iter()
                .find_map(|key| event.str_field(key))
                .unwrap_or_default();
            println!("[{kind}] {summary}");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_observability();
    let args = Args::parse();

    let config = match args.base_url {
        Some(url) => ClientConfig::new(url),
        None => ClientConfig::from_env()?,
    };
    let manager = SessionManager::new(config)?;

    let mut request = InvestigationRequest::new(args.prompt);
    if let Some(kubecontext) = args.kubecontext {
        request = request.kubecontext(kubecontext);
    }
    if let Some(model) = args.model {
        request = request.model(model);
    }
    let mode = if args.keep_open {
        InitiateMode::KeepOpen
    } else {
        InitiateMode::HandOff
    };

    let (subscription, mut events) = Subscription::channel();
    let initiated = manager.initiate(&request, mode, subscription).await?;
    println!("task_id: {}", initiated.task_id);

    while let Some(item) = events.next().await {
        match item {
            SessionEvent::Event(event) => print_event(&event),
            SessionEvent::ToolCall(call) => {
                println!("$ {} {}", call.tool_name, call.arguments);
                if let Some(output) = call.output {
                    println!("{}", output.output);
                }
            }
            SessionEvent::Done(reason) => {
                println!("done ({reason:?})");
                break;
            }
            SessionEvent::Failed(err) => {
                eprintln!("stream failed: {err}");
                break;
            }
        }
    }
    initiated.session.wait().await?;
    Ok(())
}
