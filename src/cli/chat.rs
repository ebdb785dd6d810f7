use std::path::{Path, PathBuf};

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use crate::core::AppConfig;
use crate::render;
use crate::session::{ChatTranscriptController, TranscriptEntry};
use crate::upload::{ExtensionMessage, ImageAttachment};

const HELP: &str = "Commands:
  /ask <question>     ask a new question
  /attach <path>      attach an image to the next question
  /download [path]    save the current video
  /status             show the session and video state
  /new                start over
  /quit               exit
Anything else is sent to the tutor.";

pub struct Question {
    pub text: String,
    pub context: Option<String>,
    pub image: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Ask(&'a str),
    Attach(&'a str),
    Download(Option<&'a str>),
    Status,
    New,
    Help,
    Quit,
    Message(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Input::Message(line);
        };
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match name {
            "ask" => Input::Ask(arg),
            "attach" => Input::Attach(arg),
            "download" if arg.is_empty() => Input::Download(None),
            "download" => Input::Download(Some(arg)),
            "status" => Input::Status,
            "new" => Input::New,
            "help" => Input::Help,
            "quit" | "exit" => Input::Quit,
            _ => Input::Message(line),
        }
    }
}

/// Read lines on a dedicated thread since readline blocks, results
/// keep printing while the prompt waits. The channel closes on EOF or
/// interrupt.
fn spawn_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(err) => {
                println!("Error: {:?}", err);
                return;
            }
        };
        loop {
            match rl.readline(">>> ") {
                Ok(line) => {
                    let _ = rl.add_history_entry(line.as_str());
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => break,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    println!("Error: {:?}", err);
                    break;
                }
            }
        }
    });
    rx
}

async fn print_entries(mut rx: mpsc::UnboundedReceiver<TranscriptEntry>) {
    while let Some(entry) = rx.recv().await {
        println!("{}\n", render::to_terminal(&entry));
    }
}

fn ask(
    controller: &ChatTranscriptController,
    question: &str,
    context: Option<&str>,
    image: Option<&Path>,
) -> Result<()> {
    let image = image.map(ImageAttachment::from_path).transpose()?;
    // Results arrive through the transcript stream
    let submission = controller.submit(question, context, image)?;
    tracing::debug!("Submitted {}", submission.session_id);
    Ok(())
}

fn attach(controller: &ChatTranscriptController, path: &str) -> Result<()> {
    let image = ImageAttachment::from_path(Path::new(path))?;
    let reply = controller.handle_extension_message(ExtensionMessage::image_selected(&image))?;
    println!("Attached {} ({})", image.file_name, reply.status);
    Ok(())
}

fn status(controller: &ChatTranscriptController) {
    let controls = controller.controls();
    println!("View: {:?}", controller.view_mode());
    println!("Session: {:?}", controller.session_status());
    if let Some(session) = controller.current_session() {
        println!("Question: {}", session.context);
    }
    match controller.video_surface().media() {
        Some(media) => println!("Video: {} ({:?})", media.location, media.source),
        None => println!("Video: {:?}", controller.video_surface()),
    }
    if let Some(image) = controller.pending_image() {
        println!("Attached image: {}", image);
    }
    println!(
        "Submit: {}  Send: {}  Download: {}",
        controls.submit_enabled, controls.send_enabled, controls.download_enabled
    );
}

pub async fn run(config: &AppConfig, question: Option<Question>) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<TranscriptEntry>();
    let controller = ChatTranscriptController::from_config(config)
        .streaming(tx)
        .build();
    let printer = tokio::spawn(print_entries(rx));

    if let Some(q) = question {
        if let Err(e) = ask(&controller, &q.text, q.context.as_deref(), q.image.as_deref()) {
            println!("Error: {:#}", e);
        }
    }

    let mut lines = spawn_reader();
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }

        let result = match Input::parse(&line) {
            Input::Ask(q) => ask(&controller, q, None, None),
            Input::Attach(path) => attach(&controller, path),
            Input::Download(path) => {
                let target = path.map(PathBuf::from).unwrap_or(PathBuf::from("."));
                controller
                    .export_video(&target)
                    .await
                    .map(|path| println!("Saved video to {}", path.display()))
            }
            Input::Status => {
                status(&controller);
                Ok(())
            }
            Input::New => {
                controller.reset_session();
                println!("Cleared. Ask a new question with /ask");
                Ok(())
            }
            Input::Help => {
                println!("{}", HELP);
                Ok(())
            }
            Input::Quit => break,
            Input::Message(msg) => {
                let chat = controller.clone();
                let msg = msg.to_string();
                // Don't wait for the reply, it prints when it arrives
                tokio::spawn(async move {
                    chat.send_chat_message(&msg).await;
                });
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("Error: {:#}", e);
        }
    }

    // Release any generated video before exiting
    controller.reset_session();
    printer.abort();

    Ok(())
}
