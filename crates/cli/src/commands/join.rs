// `tandem join`: follow a room from the terminal.

use anyhow::Context;
use clap::{Args, ValueEnum};
use serde::Serialize;
use tandem_client::{BufferAccessor, ClientConfig, CollabSession, SessionError, SessionEvent, SessionOptions, SessionStatus};
use tandem_common::awareness::{AwarenessEntry, CursorRange, Role};
use tandem_common::crdt::PeerId;
use tandem_common::types::EditOp;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Room to join.
    room: String,
    /// Display name shown to other peers.
    #[arg(long)]
    name: Option<String>,
    #[arg(long, value_enum, default_value_t = RoleArg::Participant)]
    role: RoleArg,
    /// Relay URL, overriding the config file.
    #[arg(long)]
    relay: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Owner,
    Participant,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Owner => Role::Owner,
            RoleArg::Participant => Role::Participant,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JoinEvent {
    Status { status: String },
    Text { text: String },
    Peers { peers: Vec<PeerView> },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PeerView {
    pub peer: PeerId,
    pub name: String,
    pub color: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorRange>,
}

impl PeerView {
    fn from_entry(entry: &AwarenessEntry) -> Option<Self> {
        let state = entry.state.as_ref()?;
        Some(Self {
            peer: entry.peer,
            name: state.user.name.clone(),
            color: state.user.color.clone(),
            role: state.user.role,
            cursor: state.cursor,
        })
    }
}

pub fn run(args: JoinArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let mut config = ClientConfig::load();
    if args.name.is_some() {
        config.display_name = args.name.clone();
    }
    let relay_url = args.relay.clone().unwrap_or_else(|| config.relay_url().to_owned());
    let options = SessionOptions::new(relay_url, args.room.clone(), config.identity(args.role.into()));

    super::runtime()?.block_on(follow_room(options, format))
}

async fn follow_room(options: SessionOptions, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let room = options.room.clone();
    let session = CollabSession::join(options).with_context(|| format!("joining room `{room}`"))?;
    let buffer = BufferAccessor::new();
    session.attach(buffer.clone());

    let (events_tx, mut events) = mpsc::unbounded_channel();
    session.subscribe(move |event| {
        let _ = events_tx.send(event.clone());
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if event == SessionEvent::StatusChanged(SessionStatus::Closed) {
                    return Err(anyhow::Error::new(SessionError::Closed)).with_context(|| format!("room `{room}`"));
                }
                if let SessionEvent::StatusChanged(status @ SessionStatus::Reconnecting { .. }) = event {
                    output::print_warning(format, "RECONNECTING", &format!("relay connection lost, {status}"));
                    continue;
                }
                let report = describe(&event, &buffer.text());
                output::print_output(format, &report, format_human)?;
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        let end = buffer.text().chars().count();
                        buffer
                            .edit(&EditOp::Insert { index: end, text: format!("{line}\n") })
                            .context("failed to append line")?;
                    }
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.leave().await;
    Ok(ExitCode::Success)
}

fn describe(event: &SessionEvent, text: &str) -> JoinEvent {
    match event {
        SessionEvent::StatusChanged(status) => JoinEvent::Status { status: status.to_string() },
        SessionEvent::RemoteChange(_) => JoinEvent::Text { text: text.to_owned() },
        SessionEvent::AwarenessChanged(entries) => {
            JoinEvent::Peers { peers: entries.iter().filter_map(PeerView::from_entry).collect() }
        }
    }
}

fn format_human(event: &JoinEvent) -> String {
    match event {
        JoinEvent::Status { status } => format!("[{status}]"),
        JoinEvent::Text { text } => format!("--- shared text ---\n{}", text.trim_end_matches('\n')),
        JoinEvent::Peers { peers } if peers.is_empty() => "[no one else here]".into(),
        JoinEvent::Peers { peers } => {
            let names: Vec<String> = peers
                .iter()
                .map(|peer| match peer.role {
                    Role::Owner => format!("{} (owner)", peer.name),
                    Role::Participant => peer.name.clone(),
                })
                .collect();
            format!("[here: {}]", names.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use tandem_common::awareness::{PresenceState, PresenceUser};
    use tandem_common::types::TextChange;

    use super::*;

    fn entry(peer: u64, name: &str, role: Role) -> AwarenessEntry {
        AwarenessEntry {
            peer: PeerId(peer),
            clock: 1,
            state: Some(PresenceState {
                user: PresenceUser { name: name.into(), color: "#123456".into(), role },
                cursor: Some(CursorRange::caret(2)),
            }),
        }
    }

    #[test]
    fn remote_change_reports_the_whole_text() {
        let event = SessionEvent::RemoteChange(vec![TextChange::Insert { index: 0, text: "x".into() }]);
        assert_eq!(describe(&event, "xyz\n"), JoinEvent::Text { text: "xyz\n".into() });
        assert_eq!(format_human(&describe(&event, "xyz\n")), "--- shared text ---\nxyz");
    }

    #[test]
    fn presence_lists_names_and_marks_owner() {
        let event = SessionEvent::AwarenessChanged(vec![entry(1, "ada", Role::Owner), entry(2, "bob", Role::Participant)]);
        let described = describe(&event, "");
        assert_eq!(format_human(&described), "[here: ada (owner), bob]");
        assert_eq!(format_human(&JoinEvent::Peers { peers: Vec::new() }), "[no one else here]");
    }

    #[test]
    fn json_events_are_tagged() {
        let described = describe(&SessionEvent::AwarenessChanged(vec![entry(7, "ada", Role::Owner)]), "");
        let value = serde_json::to_value(&described).expect("event should serialize");
        assert_eq!(value["event"], "peers");
        assert_eq!(value["peers"][0]["peer"], 7);
        assert_eq!(value["peers"][0]["role"], "owner");
        assert_eq!(value["peers"][0]["cursor"]["head"], 2);

        let status = serde_json::to_value(describe(&SessionEvent::StatusChanged(SessionStatus::Connected), ""))
            .expect("event should serialize");
        assert_eq!(status, serde_json::json!({ "event": "status", "status": "connected" }));
    }

    #[test]
    fn role_flag_maps_to_presence_role() {
        assert_eq!(Role::from(RoleArg::Owner), Role::Owner);
        assert_eq!(Role::from(RoleArg::Participant), Role::Participant);
    }
}
