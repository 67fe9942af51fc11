//! Re-attach to a running or finished investigation by task id.
//!
//! Stored events are replayed first, then live ones follow. Ctrl-C stops the
//! local reader; `--cancel` asks the server to stop the investigation.

use clap::Parser;
use investigation_stream::init_observability;
use investigation_stream::prelude::*;

#[derive(Debug, Parser)]
#[command(about = "Follow an investigation's event stream by task id")]
struct Args {
    task_id: String,
    #[arg(long)]
    base_url: Option<String>,
    /// Request server-side cancellation instead of following the stream.
    #[arg(long)]
    cancel: bool,
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

    if args.cancel {
        let ack = manager.cancel_investigation(&args.task_id).await?;
        println!("{}: {} {}", ack.task_id, ack.status, ack.message);
        return Ok(());
    }

    let subscription = Subscription::new()
        .on_any(|event| {
            println!("[{}] {}", event.kind, serde_json::Value::Object(event.payload.clone()));
            Ok(())
        })
        .on_tool_call(|call| {
            let output = call.output.as_ref().map(|o| o.output.as_str()).unwrap_or("<pending>");
            println!("$ {} {} => {output}", call.tool_name, call.arguments);
            Ok(())
        })
        .on_done(|reason| println!("done ({reason:?})"))
        .on_error(|err| eprintln!("stream failed: {err}"));

    let session = manager.subscribe(&args.task_id, subscription)?;
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let report = session.wait().await?;
    println!(
        "session {} ended in {:?} after {} frames",
        report.session_id, report.state, report.frames
    );
    Ok(())
}
