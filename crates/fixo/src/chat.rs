// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `fixo chat` command implementation.
//!
//! A terminal live-chat client: a [`SessionOrchestrator`] over a
//! [`RemoteBackend`], a readline prompt for input and slash commands, and
//! a printer task rendering new messages, session changes and notices.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::{broadcast, watch};

use fixo_bus::{DeviceBus, DeviceEvent, Notice, NoticeLevel};
use fixo_client::RemoteBackend;
use fixo_config::FixoConfig;
use fixo_core::{FixoError, Identity, Message, MessageType, SessionStatus};
use fixo_engine::{OrchestratorState, SessionOrchestrator};
use fixo_rtc::{PeerConnectionFactory, WebRtcFactory};

use crate::serve::init_tracing;

const HELP: &str = "\
/queue [complaint]          ask for help and wait for an admin
/create <student> [complaint]  start a chat with a student (admin)
/waiting                    list sessions waiting for an admin
/join <session>             take a waiting session (admin)
/end                        end the current chat
/file <path>                send a file
/link <path>                print a download link for an attachment
/share | /unshare           start or stop screen sharing
/audio                      toggle the microphone
/help                       show this list
/quit                       leave (the chat stays open)";

/// One line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Queue { complaint: Option<String> },
    Create { student: String, complaint: Option<String> },
    Waiting,
    Join(String),
    End,
    File(PathBuf),
    Link(String),
    Share,
    Unshare,
    Audio,
    Help,
    Quit,
}

/// Parse a trimmed, non-empty input line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((rest, ""));
    let mut words = args.split_whitespace();
    let first = words.next().map(str::to_string);
    let second = words.next().map(str::to_string);

    match name {
        "queue" => Ok(Command::Queue { complaint: first }),
        "create" => first
            .map(|student| Command::Create {
                student,
                complaint: second,
            })
            .ok_or_else(|| "usage: /create <student> [complaint]".to_string()),
        "waiting" => Ok(Command::Waiting),
        "join" => first
            .map(Command::Join)
            .ok_or_else(|| "usage: /join <session>".to_string()),
        "end" => Ok(Command::End),
        "file" if !args.is_empty() => Ok(Command::File(PathBuf::from(args))),
        "file" => Err("usage: /file <path>".to_string()),
        "link" => first
            .map(Command::Link)
            .ok_or_else(|| "usage: /link <path>".to_string()),
        "share" => Ok(Command::Share),
        "unshare" => Ok(Command::Unshare),
        "audio" => Ok(Command::Audio),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}, try /help")),
    }
}

/// Runs the `fixo chat` command against `config.client`.
pub async fn run_chat(config: FixoConfig) -> Result<(), FixoError> {
    // the prompt owns the terminal; only warnings go to stderr
    init_tracing("warn");

    let backend = Arc::new(RemoteBackend::from_config(&config.client)?);
    let identity = backend.identity().clone();
    let factory: Arc<dyn PeerConnectionFactory> = Arc::new(WebRtcFactory);
    let device = DeviceBus::default();
    let orchestrator = SessionOrchestrator::builder(identity.clone(), backend.clone(), factory)
        .rtc_config(config.rtc.clone())
        .device_bus(device.clone())
        .build();

    let notices = device.subscribe();
    orchestrator.mount().await?;
    let printer = tokio::spawn(print_updates(
        orchestrator.watch(),
        notices,
        identity.clone(),
    ));

    let mut rl = DefaultEditor::new()
        .map_err(|e| FixoError::Internal(format!("failed to initialize readline: {e}")))?;

    println!("{}", "fixo chat".bold().green());
    println!(
        "Connected to {} as {} ({}). Type {} for commands.\n",
        backend.base_url(),
        identity.user_id.bold(),
        identity.role,
        "/help".yellow()
    );

    let prompt = format!("{}> ", "fixo".green());
    loop {
        let line = tokio::task::block_in_place(|| rl.readline(&prompt));
        match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);
                match parse_command(trimmed) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = execute(&orchestrator, command).await {
                            // failures are also announced as notices; validation is not
                            if matches!(e, FixoError::Validation(_)) {
                                eprintln!("{}: {e}", "error".red());
                            }
                        }
                    }
                    Err(usage) => eprintln!("{}", usage.yellow()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "error".red());
                break;
            }
        }
    }

    orchestrator.unmount().await;
    printer.abort();
    Ok(())
}

async fn execute<B>(orchestrator: &SessionOrchestrator<B>, command: Command) -> Result<(), FixoError>
where
    B: fixo_core::SupportBackend + 'static,
{
    match command {
        Command::Say(text) => {
            orchestrator.send_message(&text).await?;
        }
        Command::Queue { complaint } => {
            orchestrator.create_session(complaint, None).await?;
        }
        Command::Create { student, complaint } => {
            orchestrator.create_session(complaint, Some(student)).await?;
        }
        Command::Waiting => {
            let waiting = orchestrator.state().waiting;
            if waiting.is_empty() {
                println!("{}", "no sessions are waiting".dimmed());
            }
            for session in waiting {
                println!(
                    "  {}  {}  since {}",
                    session.id.bold(),
                    session.student_id,
                    clock(&session.created_at)
                );
            }
        }
        Command::Join(session_id) => {
            orchestrator.join_session(&session_id).await?;
        }
        Command::End => {
            orchestrator.end_session().await?;
        }
        Command::File(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| FixoError::Validation(format!("cannot read {}: {e}", path.display())))?;
            orchestrator.upload_file(&file_name(&path), bytes).await?;
        }
        Command::Link(path) => {
            let url = orchestrator.attachment_url(&path).await?;
            println!("{}", url.underline());
        }
        Command::Share => orchestrator.start_screen_share().await?,
        Command::Unshare => orchestrator.stop_screen_share().await?,
        Command::Audio => {
            let on = orchestrator.toggle_audio().await?;
            println!("{}", if on { "microphone on" } else { "microphone off" }.dimmed());
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

/// `HH:MM` out of an ISO timestamp.
fn clock(timestamp: &str) -> &str {
    timestamp.get(11..16).unwrap_or(timestamp)
}

async fn print_updates(
    mut state: watch::Receiver<OrchestratorState>,
    mut events: broadcast::Receiver<DeviceEvent>,
    me: Identity,
) {
    let mut transcript = Transcript::new(me);
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                for line in transcript.update(&snapshot) {
                    println!("{line}");
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(notice) = event.notice() {
                        println!("{}", render_notice(&notice));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Turns successive orchestrator states into the lines not printed yet.
struct Transcript {
    me: Identity,
    printed: HashSet<String>,
    session: Option<(String, SessionStatus)>,
    waiting: usize,
}

impl Transcript {
    fn new(me: Identity) -> Self {
        Self {
            me,
            printed: HashSet::new(),
            session: None,
            waiting: 0,
        }
    }

    fn update(&mut self, state: &OrchestratorState) -> Vec<String> {
        let mut lines = Vec::new();

        let current = state
            .active_session
            .as_ref()
            .map(|s| (s.id.clone(), s.status));
        if current != self.session {
            match (&current, state.active_session.as_ref()) {
                (Some((id, SessionStatus::Waiting)), _) => {
                    lines.push(format!("-- session {id} is waiting for an admin --").dimmed().to_string());
                }
                (Some((id, _)), Some(session)) => {
                    let peer = session.peer_of(&self.me.user_id).unwrap_or("nobody yet");
                    lines.push(
                        format!("-- session {id} active with {peer} --")
                            .green()
                            .to_string(),
                    );
                }
                _ => {
                    self.printed.clear();
                    if self.session.is_some() {
                        lines.push("-- no active session --".dimmed().to_string());
                    }
                }
            }
            self.session = current;
        }

        if self.me.is_admin() && state.waiting.len() != self.waiting {
            if state.waiting.len() > self.waiting {
                lines.push(
                    format!("{} waiting (/waiting to list)", state.waiting.len())
                        .yellow()
                        .to_string(),
                );
            }
            self.waiting = state.waiting.len();
        }

        for message in &state.messages {
            if self.printed.insert(message.id.clone()) {
                lines.push(self.render(message));
            }
        }
        lines
    }

    fn render(&self, message: &Message) -> String {
        let time = clock(&message.created_at).dimmed();
        match message.message_type {
            MessageType::System => format!("{time} {}", message.message.italic().dimmed()),
            MessageType::File => {
                let who = self.who(message);
                let path = message.file_url.as_deref().unwrap_or("");
                format!("{time} {who}: {} {}", message.message, format!("[{path}]").cyan())
            }
            MessageType::Text => format!("{time} {}: {}", self.who(message), message.message),
        }
    }

    fn who(&self, message: &Message) -> String {
        if message.sender_id == self.me.user_id {
            "you".blue().bold().to_string()
        } else {
            message.sender_id.magenta().bold().to_string()
        }
    }
}

fn render_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!("* {}", notice.message).dimmed().to_string(),
        NoticeLevel::Success => format!("* {}", notice.message).green().to_string(),
        NoticeLevel::Warning => format!("! {}", notice.message).yellow().to_string(),
        NoticeLevel::Error => format!("! {}", notice.message).red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixo_core::{Role, Session};

    fn session(status: SessionStatus) -> Session {
        Session {
            id: "s1".into(),
            student_id: "stu-1".into(),
            admin_id: (status != SessionStatus::Waiting).then(|| "adm-1".to_string()),
            status,
            complaint_id: None,
            initiator: Role::Student,
            created_at: "2026-03-01T09:15:00.000Z".into(),
            started_at: None,
            ended_at: None,
            updated_at: "2026-03-01T09:15:00.000Z".into(),
        }
    }

    fn message(id: &str, sender: &str, text: &str) -> Message {
        Message {
            id: id.into(),
            session_id: "s1".into(),
            sender_id: sender.into(),
            message: text.into(),
            message_type: MessageType::Text,
            file_url: None,
            created_at: "2026-03-01T09:16:00.000Z".into(),
            read_at: None,
            read_by: None,
        }
    }

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            parse_command("the wifi is down"),
            Ok(Command::Say("the wifi is down".into()))
        );
    }

    #[test]
    fn slash_commands_parse_their_arguments() {
        assert_eq!(
            parse_command("/queue C-12"),
            Ok(Command::Queue {
                complaint: Some("C-12".into())
            })
        );
        assert_eq!(
            parse_command("/create stu-4"),
            Ok(Command::Create {
                student: "stu-4".into(),
                complaint: None
            })
        );
        assert_eq!(parse_command("/join abc"), Ok(Command::Join("abc".into())));
        assert_eq!(
            parse_command("/file  notes/screen shot.png"),
            Ok(Command::File(PathBuf::from("notes/screen shot.png")))
        );
        assert_eq!(parse_command("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn missing_arguments_show_usage() {
        assert!(parse_command("/join").unwrap_err().contains("usage"));
        assert!(parse_command("/create").unwrap_err().contains("usage"));
        assert!(parse_command("/file").unwrap_err().contains("usage"));
        assert!(parse_command("/dance").unwrap_err().contains("/help"));
    }

    #[test]
    fn transcript_prints_each_message_once() {
        let mut transcript = Transcript::new(Identity::student("stu-1"));
        let mut state = OrchestratorState::new(Identity::student("stu-1"));
        state.active_session = Some(session(SessionStatus::Active));
        state.messages = vec![message("m1", "adm-1", "hello")];

        let first = transcript.update(&state);
        assert_eq!(first.len(), 2);
        assert!(first[0].contains("active with adm-1"));
        assert!(first[1].contains("hello"));

        state.messages.push(message("m2", "stu-1", "hi"));
        let second = transcript.update(&state);
        assert_eq!(second.len(), 1);
        assert!(second[0].contains("you"));
        assert!(transcript.update(&state).is_empty());
    }

    #[test]
    fn transcript_announces_the_end() {
        let mut transcript = Transcript::new(Identity::student("stu-1"));
        let mut state = OrchestratorState::new(Identity::student("stu-1"));
        state.active_session = Some(session(SessionStatus::Waiting));
        assert!(transcript.update(&state)[0].contains("waiting for an admin"));
        state.active_session = None;
        assert!(transcript.update(&state)[0].contains("no active session"));
    }

    #[test]
    fn admins_hear_about_new_waiting_sessions() {
        let mut transcript = Transcript::new(Identity::admin("adm-1"));
        let mut state = OrchestratorState::new(Identity::admin("adm-1"));
        state.waiting = vec![session(SessionStatus::Waiting)];
        let lines = transcript.update(&state);
        assert!(lines.iter().any(|l| l.contains("1 waiting")));
        assert!(transcript.update(&state).is_empty());
    }

    #[test]
    fn clock_slices_iso_timestamps() {
        assert_eq!(clock("2026-03-01T09:15:00.000Z"), "09:15");
        assert_eq!(clock("bad"), "bad");
    }
}
