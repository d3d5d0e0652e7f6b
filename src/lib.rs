pub mod backend;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod status;
pub mod stream;
pub mod tree;

use backend::{ Backend, HttpBackend };
use cli::Args;
use config::ClientConfig;
use controller::ChatSessionController;
use log::info;
use models::chat::ChatId;
use status::LogStatusSink;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use stream::StreamUpdate;

enum Step {
    Update(Result<Option<StreamUpdate>, error::ChatError>),
    Interrupted,
}

/// Headless driver: logs in, opens a chat, sends one message and prints the
/// streamed reply to stdout.
pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = ClientConfig::from_args(&args)?;

    info!("--- Client Configuration ---");
    info!("Backend URL: {}", config.base_url);
    info!("Login: {}", if config.password.is_some() { "password" } else { "none" });
    info!("Request Timeout: {:?}", config.request_timeout);
    info!("Stream Buffer: {}", config.stream_buffer);
    info!("Stream Idle Timeout: {:?}", config.stream_idle_timeout);
    info!("Max Coalesced Events: {}", config.max_coalesced_events);
    info!("Refetch After Edit: {}", config.refetch_after_edit);
    info!("----------------------------");

    let http = HttpBackend::new(&config)?;
    if let Some(password) = &config.password {
        http.login(password).await?;
    }
    let backend: Arc<dyn Backend> = Arc::new(http);
    let mut controller = ChatSessionController::new(backend, Arc::new(LogStatusSink), &config);

    controller.refresh_chats().await?;
    if args.new_chat {
        controller.create_chat().await?;
    } else if let Some(chat) = &args.chat {
        controller.switch_chat(&ChatId::from(chat.as_str())).await?;
    } else {
        let latest = controller.chats().first().map(|summary| summary.id.clone());
        match latest {
            Some(chat_id) => controller.switch_chat(&chat_id).await?,
            None => {
                controller.create_chat().await?;
            }
        }
    }

    let shown = controller.current_path().await?.len();
    if let Some(chat) = controller.current_chat() {
        info!("Chat '{}' ({}): {} messages on the current branch", chat.title, chat.id, shown);
    }

    let message = match args.message {
        Some(message) => message,
        None => {
            info!("No message given; nothing to send");
            return Ok(());
        }
    };
    controller.send_pending(&message).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = Printed::default();

    loop {
        let step = tokio::select! {
            update = controller.pump_stream() => Step::Update(update),
            _ = &mut ctrl_c => Step::Interrupted,
        };

        match step {
            Step::Interrupted => {
                controller.stop();
                printed.flush_from(&controller)?;
                println!();
                info!("Interrupted; the partial reply is kept");
                break;
            }
            Step::Update(Ok(Some(StreamUpdate::Finished(node_id)))) => {
                printed.flush_from(&controller)?;
                println!();
                if let Some(timings) = controller.render().and_then(|render| render.timings()) {
                    info!("Node {} finished at {}", node_id, timings.throughput_label());
                }
                break;
            }
            Step::Update(Ok(Some(_))) => printed.flush_from(&controller)?,
            Step::Update(Ok(None)) => break,
            Step::Update(Err(err)) => {
                printed.flush_from(&controller)?;
                println!();
                return Err(err.into());
            }
        }
    }

    Ok(())
}

/// How much of the render state has already reached stdout.
#[derive(Default)]
struct Printed {
    content: usize,
    tool_calls: usize,
    tool_results: usize,
}

impl Printed {
    fn flush_from(&mut self, controller: &ChatSessionController) -> std::io::Result<()> {
        let render = match controller.render() {
            Some(render) => render,
            None => {
                return Ok(());
            }
        };
        let mut out = std::io::stdout().lock();

        for call in render.tool_call_blocks().iter().skip(self.tool_calls) {
            writeln!(out, "[tool call] {} {}", call.name, call.arguments)?;
        }
        self.tool_calls = render.tool_call_blocks().len();

        for result in render.tool_result_blocks().iter().skip(self.tool_results) {
            writeln!(out, "[tool result] {}", result.content.display_text())?;
        }
        self.tool_results = render.tool_result_blocks().len();

        let content = render.accumulated_content();
        if let Some(delta) = content.get(self.content..) {
            write!(out, "{}", delta)?;
        }
        self.content = content.len();
        out.flush()
    }
}
