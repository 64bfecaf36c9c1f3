//! Chat command router.
//!
//! Messages starting with `!` are relay commands; everything else becomes a
//! prompt [`Task`] for the channel's conversation.
//!
//! | Command         | Effect                                                  |
//! |-----------------|---------------------------------------------------------|
//! | `!ping`         | Liveness check                                          |
//! | `!help`         | List commands                                           |
//! | `!status`       | Running/queued state, continuation, verbosity, workers |
//! | `!reset`        | Drop the continuation token; next prompt starts fresh   |
//! | `!cancel`       | Kill the running task and drop queued ones              |
//! | `!verbose`      | Toggle thinking output                                  |
//! | `!fork <name>`  | New channel continuing from this conversation           |
//! | `!new <name>`   | New channel with a fresh conversation                   |
//! | `!kill`         | Cancel, forget the conversation, archive the channel    |

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::app::AppState;
use crate::models::task::{Destination, MessageBody, MessageRef, Task};
use crate::Result;

/// Directory under a conversation's workdir receiving inbound attachments.
pub const UPLOADS_DIR: &str = "slack-files";

const HELP_TEXT: &str = "*Commands*\n\
`!ping` check the relay is alive\n\
`!status` show this conversation's state\n\
`!reset` start a fresh conversation on the next prompt\n\
`!cancel` stop the running task and drop queued ones\n\
`!verbose` toggle thinking output\n\
`!fork <name>` continue this conversation in a new channel\n\
`!new <name>` start a fresh conversation in a new channel\n\
`!kill` stop, forget, and archive this channel\n\
Anything else is sent to the agent.";

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFile {
    /// Original file name.
    pub name: String,
    /// Private download URL.
    pub url: String,
}

/// An authorized user message, stripped of Slack wire types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel the message was posted in; doubles as the conversation key.
    pub channel: String,
    /// Message timestamp.
    pub ts: String,
    /// Thread root, when the message was posted inside a thread.
    pub thread_ts: Option<String>,
    /// Author.
    pub user: String,
    /// Message text.
    pub text: String,
    /// Attached files.
    pub files: Vec<InboundFile>,
}

impl InboundMessage {
    /// Thread that replies to this message belong in.
    #[must_use]
    pub fn reply_destination(&self) -> Destination {
        Destination::thread(
            self.channel.clone(),
            self.thread_ts.clone().unwrap_or_else(|| self.ts.clone()),
        )
    }
}

/// A parsed relay command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `!ping`
    Ping,
    /// `!help`
    Help,
    /// `!status`
    Status,
    /// `!reset`
    Reset,
    /// `!cancel`
    Cancel,
    /// `!verbose`
    Verbose,
    /// `!fork <name>`
    Fork(String),
    /// `!new <name>`
    New(String),
    /// `!kill`
    Kill,
    /// Unrecognised `!word`, or a command missing its argument.
    Invalid(String),
}

impl ChatCommand {
    /// Parse `text` as a command; `None` means it is a prompt.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.trim().strip_prefix('!')?;
        let (word, arg) = match body.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (body, ""),
        };
        if word.is_empty() {
            return None;
        }

        let command = match word.to_lowercase().as_str() {
            "ping" => Self::Ping,
            "help" => Self::Help,
            "status" => Self::Status,
            "reset" => Self::Reset,
            "cancel" | "stop" => Self::Cancel,
            "verbose" => Self::Verbose,
            "kill" => Self::Kill,
            "fork" if !arg.is_empty() => Self::Fork(arg.to_owned()),
            "new" if !arg.is_empty() => Self::New(arg.to_owned()),
            "fork" | "new" => Self::Invalid(format!("usage: `!{word} <name>`")),
            other => Self::Invalid(format!("unknown command `!{other}`; try `!help`")),
        };
        Some(command)
    }
}

/// Route an inbound message to a command or the executor.
pub async fn dispatch(app: &AppState, message: InboundMessage) {
    let reply_to = Destination::channel(message.channel.clone());
    let result = match ChatCommand::parse(&message.text) {
        Some(command) => {
            info!(channel = %message.channel, ?command, "running command");
            execute(app, command, &message.channel).await
        }
        None => submit_prompt(app, message).await,
    };

    if let Err(err) = result {
        warn!(%err, "message handling failed");
        reply(app, &reply_to, &format!(":x: {err}")).await;
    }
}

/// Execute `command` for the conversation of `channel`.
///
/// # Errors
///
/// Returns the error of the failing store or transport operation.
pub async fn execute(app: &AppState, command: ChatCommand, channel: &str) -> Result<()> {
    let here = Destination::channel(channel);
    let scheduler = app.executor.scheduler();
    let store = app.executor.store();

    match command {
        ChatCommand::Ping => reply(app, &here, "pong!").await,
        ChatCommand::Help => reply(app, &here, HELP_TEXT).await,
        ChatCommand::Invalid(message) => {
            reply(app, &here, &format!(":grey_question: {message}")).await;
        }
        ChatCommand::Status => {
            let status = scheduler.status(channel).await;
            let token = store.get(channel).await;
            let verbose = store.is_verbose(channel).await;
            let workdir = workdir_for(app, channel).await;
            let text = format!(
                "*Status*\nrunning: {}\nqueued: {}\nconversation: {}\nverbose: {}\nworkdir: `{}`\nworkers: {}/{} free",
                if status.busy { "yes" } else { "no" },
                status.queued,
                token.map_or_else(|| "fresh".to_owned(), |token| format!("`{token}`")),
                if verbose { "on" } else { "off" },
                workdir.display(),
                scheduler.available_workers(),
                scheduler.capacity(),
            );
            reply(app, &here, &text).await;
        }
        ChatCommand::Reset => {
            let had_token = store.delete(channel).await?;
            let text = if had_token {
                ":broom: Conversation reset. The next prompt starts fresh."
            } else {
                "Nothing to reset; the next prompt starts fresh."
            };
            reply(app, &here, text).await;
        }
        ChatCommand::Cancel => {
            let dropped = scheduler.clear_queue(channel).await;
            let cancelled = scheduler.cancel(channel).await;
            let text = match (cancelled, dropped) {
                (false, 0) => "Nothing is running.".to_owned(),
                (true, 0) => ":no_entry_sign: Cancelling the running task.".to_owned(),
                (_, dropped) => format!(
                    ":no_entry_sign: Cancelling; dropped {dropped} queued task(s)."
                ),
            };
            reply(app, &here, &text).await;
        }
        ChatCommand::Verbose => {
            let enabled = store.toggle_verbose(channel).await?;
            let text = if enabled {
                ":mag: Verbose mode on: thinking is shown."
            } else {
                "Verbose mode off."
            };
            reply(app, &here, text).await;
        }
        ChatCommand::Fork(name) => {
            let Some(token) = store.fork(channel).await else {
                reply(app, &here, "Nothing to fork yet; send a prompt first.").await;
                return Ok(());
            };
            let workdir = workdir_for(app, channel).await;
            let new_channel = app.transport.create_channel(&name).await?;
            store.set_pending_fork(&new_channel, &token).await?;
            store.set_workdir(&new_channel, &workdir).await?;
            info!(source = channel, fork = new_channel, "conversation forked");

            reply(
                app,
                &Destination::channel(new_channel.clone()),
                &format!(":fork_and_knife: Forked from <#{channel}>. The next prompt here continues from that point."),
            )
            .await;
            reply(app, &here, &format!(":fork_and_knife: Forked into <#{new_channel}>.")).await;
        }
        ChatCommand::New(name) => {
            let new_channel = app.transport.create_channel(&name).await?;
            let workdir = project_dir(&app.config.default_workspace_root, &name);
            store.set_workdir(&new_channel, &workdir).await?;
            info!(channel = new_channel, workdir = %workdir.display(), "conversation created");

            reply(
                app,
                &Destination::channel(new_channel.clone()),
                &format!(
                    ":rocket: Conversation `{name}` ready in `{}`. Send messages here to talk to the agent.",
                    workdir.display()
                ),
            )
            .await;
            reply(app, &here, &format!(":rocket: Created <#{new_channel}>.")).await;
        }
        ChatCommand::Kill => {
            scheduler.clear_queue(channel).await;
            scheduler.cancel(channel).await;
            store.forget(channel).await?;
            reply(app, &here, ":wastebasket: Conversation killed; archiving channel.").await;
            app.transport.archive_channel(channel).await?;
        }
    }
    Ok(())
}

async fn submit_prompt(app: &AppState, message: InboundMessage) -> Result<()> {
    let destination = message.reply_destination();
    let workdir = workdir_for(app, &message.channel).await;
    let files = download_files(app, &message, &workdir).await;

    let task = Task::new(
        message.channel.clone(),
        message.text.clone(),
        destination,
        workdir,
    )
    .with_source(MessageRef::new(message.channel.clone(), message.ts.clone()))
    .with_files(files);

    let position = app.executor.submit(task).await?;
    info!(channel = %message.channel, position, "prompt submitted");
    Ok(())
}

async fn download_files(
    app: &AppState,
    message: &InboundMessage,
    workdir: &Path,
) -> Vec<PathBuf> {
    if message.files.is_empty() {
        return Vec::new();
    }
    let Some(slack) = app.slack.as_ref() else {
        warn!("file attachments ignored: no slack client");
        return Vec::new();
    };

    let dir = workdir.join(UPLOADS_DIR);
    let mut paths = Vec::with_capacity(message.files.len());
    for file in &message.files {
        match slack.download_file(&file.url, &file.name, &dir).await {
            Ok(path) => paths.push(path),
            Err(err) => {
                warn!(%err, name = %file.name, "attachment download failed");
                reply(
                    app,
                    &message.reply_destination(),
                    &format!(":warning: Could not download `{}`: {err}", file.name),
                )
                .await;
            }
        }
    }
    paths
}

async fn workdir_for(app: &AppState, channel: &str) -> PathBuf {
    match app.executor.store().workdir(channel).await {
        Some(dir) => dir,
        None => app.config.default_workspace_root.clone(),
    }
}

/// Working directory for `!new <name>`: `<root>/<name>` when it exists,
/// else the root itself.
#[must_use]
pub fn project_dir(root: &Path, name: &str) -> PathBuf {
    let candidate = root.join(name.trim());
    let inside_root = !name.contains("..") && !Path::new(name.trim()).is_absolute();
    if inside_root && candidate.is_dir() {
        candidate
    } else {
        root.to_path_buf()
    }
}

async fn reply(app: &AppState, destination: &Destination, text: &str) {
    if let Err(err) = app.transport.post(destination, &MessageBody::text(text)).await {
        warn!(%err, "failed to post reply");
    }
}
