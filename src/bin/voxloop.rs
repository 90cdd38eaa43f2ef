//! Demo consumer for the listening session.
//!
//! Stands in for the assistant GUI: prints every emitted event and drives
//! the control surface from stdin commands.

use anyhow::{Context, Result};
use std::io::{self, BufRead};
use std::sync::Arc;
use voxloop::config::AppConfig;
use voxloop::{init_tracing, ListenEvent, ListeningSession, MicSource, WhisperRecognizer};

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    if config.logs {
        init_tracing();
    }

    if config.list_input_devices {
        for name in MicSource::list_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let source = Arc::new(MicSource::with_tuning(
        config.input_device.clone(),
        config.mic_tuning(),
    ));
    let model = config.model.to_string_lossy();
    let recognizer = Arc::new(
        WhisperRecognizer::new(&model, config.whisper_options())
            .with_context(|| format!("failed to load whisper model from {model}"))?,
    );

    let mut session = ListeningSession::new(config.session_config(), source, recognizer);
    let events = session.events();
    let json = config.json;
    let printer = std::thread::spawn(move || {
        for event in events.iter() {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => eprintln!("failed to encode event: {err}"),
                }
            } else {
                print_event(&event);
            }
        }
    });

    session.start();
    eprintln!("listening (wake word: {:?}); commands: answer | stop | start | quit", config.wake_word);

    for line in io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "answer" => session.request_answer_mode(),
            "stop" => session.stop(),
            "start" => session.start(),
            "quit" | "exit" => break,
            "" => {}
            other => eprintln!("unknown command: {other}"),
        }
    }

    // Dropping the session drops the installed sink, which closes the
    // printer's channel.
    drop(session);
    let _ = printer.join();
    Ok(())
}

fn print_event(event: &ListenEvent) {
    match event {
        ListenEvent::WakeWordDetected => println!("* wake word detected; listening for a command"),
        ListenEvent::CommandFinished(text) => println!("> command: {text}"),
        ListenEvent::CommandTimeout => println!("* no command heard"),
        ListenEvent::CommandUnrecognized => println!("* command not understood"),
        ListenEvent::AnswerReceived(text) => println!("> answer: {text}"),
        ListenEvent::AnswerTimeout => println!("* no answer heard"),
        ListenEvent::PartialRecognition(text) => println!("~ heard: {text}"),
        ListenEvent::Error(message) => eprintln!("! error: {message}"),
    }
}
