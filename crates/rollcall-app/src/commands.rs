// `!gov` commands: parsing, permission checks, execution and replies.

use std::sync::Arc;

use rollcall_core::glyph::{self, MAX_CANDIDATES};
use rollcall_core::names::{self, NameError};
use rollcall_core::platform::display_name_or_id;
use rollcall_core::{raffle, AggregateStore, ChatPlatform, LiveVoteError, LiveVoteRegistry};
use rollcall_core::{MessageId, UserId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{CommandConfig, Config, RoleConfig, WeekRange};
use crate::protocol::ChatMessage;

/// Reaction put on a command message from someone without the access role.
pub const ACCESS_DENIED_GLYPH: &str = "❌";

const SUBCOMMANDS: &str = "<register|unregister|list|raffle|vote> [args]";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything that stops a command. Each variant becomes the reply text,
/// except `AccessDenied`, which is answered with a reaction.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown subcommand `{0}`")]
    UnknownSubcommand(String),

    #[error("Invalid week. Provide a week number between {min} and {max} (e.g. week21 or 21).")]
    InvalidWeek { min: u32, max: u32 },

    #[error("Invalid name: {0}.")]
    InvalidName(#[from] NameError),

    #[error("Could not resolve the target user. Use a mention or user id.")]
    UnknownTarget,

    #[error("You don't have permission to {0}.")]
    NotPermitted(&'static str),

    #[error("Need at least two registered users for '{0}' to start a vote.")]
    NotEnoughCandidates(String),

    #[error("Could not start the vote: {0}.")]
    LiveVote(#[from] LiveVoteError),

    #[error("Error : {0}")]
    Platform(anyhow::Error),

    #[error("This command only works in a server channel.")]
    GuildOnly,

    #[error("access role missing")]
    AccessDenied,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A parsed `!gov` subcommand. Group names are already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovCommand {
    Register { group: String, target: Option<UserId> },
    Unregister { group: String, target: Option<UserId> },
    List { group: Option<String> },
    Raffle { group: String, winners: usize },
    Vote { poll: String, option: String },
    VoteList { poll: String },
    VoteResult { poll: String },
    VoteStart { group: String },
}

impl GovCommand {
    /// Parse the text after `!gov`.
    pub fn parse(args: &str, weeks: WeekRange) -> Result<Self, CommandError> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let Some(sub) = parts.first() else {
            return Err(CommandError::Usage(SUBCOMMANDS));
        };

        match sub.to_lowercase().as_str() {
            "register" => {
                let raw = parts
                    .get(1)
                    .ok_or(CommandError::Usage("register <week#> [user]"))?;
                Ok(GovCommand::Register {
                    group: week_group(raw, weeks)?,
                    target: parts.get(2).map(|t| parse_target(t)).transpose()?,
                })
            }
            "unregister" => {
                let raw = parts
                    .get(1)
                    .ok_or(CommandError::Usage("unregister <week#> [user]"))?;
                Ok(GovCommand::Unregister {
                    group: week_group(raw, weeks)?,
                    target: parts.get(2).map(|t| parse_target(t)).transpose()?,
                })
            }
            "list" => Ok(GovCommand::List {
                group: parts.get(1).map(|raw| week_group(raw, weeks)).transpose()?,
            }),
            "raffle" => {
                let raw = parts
                    .get(1)
                    .ok_or(CommandError::Usage("raffle <group> [winners]"))?;
                names::validate(raw)?;
                let winners = parts
                    .get(2)
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(1);
                Ok(GovCommand::Raffle {
                    group: normalize_week(raw, weeks).unwrap_or_else(|| raw.to_string()),
                    winners,
                })
            }
            "vote" => parse_vote(&parts[1..], weeks),
            other => Err(CommandError::UnknownSubcommand(other.to_string())),
        }
    }

    /// Short name for audit records.
    pub fn name(&self) -> &'static str {
        match self {
            GovCommand::Register { .. } => "register",
            GovCommand::Unregister { .. } => "unregister",
            GovCommand::List { .. } => "list",
            GovCommand::Raffle { .. } => "raffle",
            GovCommand::Vote { .. } => "vote",
            GovCommand::VoteList { .. } => "vote list",
            GovCommand::VoteResult { .. } => "vote result",
            GovCommand::VoteStart { .. } => "vote start",
        }
    }
}

const VOTE_USAGE: &str =
    "vote <poll> <option> | vote list <poll> | vote result <poll> | vote start <week#>";

fn parse_vote(parts: &[&str], weeks: WeekRange) -> Result<GovCommand, CommandError> {
    let (first, rest) = parts.split_first().ok_or(CommandError::Usage(VOTE_USAGE))?;

    let poll_arg = |usage| -> Result<String, CommandError> {
        let poll = rest.first().ok_or(CommandError::Usage(usage))?;
        names::validate(poll)?;
        Ok(poll.to_string())
    };

    match first.to_lowercase().as_str() {
        "list" => Ok(GovCommand::VoteList {
            poll: poll_arg("vote list <poll>")?,
        }),
        "result" | "results" => Ok(GovCommand::VoteResult {
            poll: poll_arg("vote result <poll>")?,
        }),
        "start" => {
            let raw = rest
                .first()
                .ok_or(CommandError::Usage("vote start <week#>"))?;
            Ok(GovCommand::VoteStart {
                group: week_group(raw, weeks)?,
            })
        }
        // `vote <week>` is the short form of `vote start <week>`.
        _ if rest.is_empty() => match normalize_week(first, weeks) {
            Some(group) if looks_like_week(first) => Ok(GovCommand::VoteStart { group }),
            _ => Err(CommandError::Usage(VOTE_USAGE)),
        },
        _ => {
            let option = rest.join(" ");
            names::validate(first)?;
            names::validate(&option)?;
            Ok(GovCommand::Vote {
                poll: first.to_string(),
                option,
            })
        }
    }
}

/// `week{N}` for the first run of digits in `raw`, if N is within `weeks`.
///
/// Accepts `21`, `week21`, `Week 21`, `w21`.
pub fn normalize_week(raw: &str, weeks: WeekRange) -> Option<String> {
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let week: u32 = digits.parse().ok()?;
    (weeks.min..=weeks.max)
        .contains(&week)
        .then(|| format!("week{week}"))
}

/// `21` or `week21`, but not a poll name that merely contains digits.
fn looks_like_week(raw: &str) -> bool {
    raw.chars().all(|c| c.is_ascii_digit()) || raw.to_lowercase().starts_with("week")
}

fn week_group(raw: &str, weeks: WeekRange) -> Result<String, CommandError> {
    normalize_week(raw, weeks).ok_or(CommandError::InvalidWeek {
        min: weeks.min,
        max: weeks.max,
    })
}

/// A user given as a mention (`<@123>`, `<@!123>`) or a bare id.
pub fn parse_target(raw: &str) -> Result<UserId, CommandError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits.parse().map_err(|_| CommandError::UnknownTarget)
}

fn has_any_role(held: &[String], wanted: &[String]) -> bool {
    held.iter()
        .any(|h| wanted.iter().any(|w| h.eq_ignore_ascii_case(w)))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Text still to be posted as the reply.
    Reply(String),
    /// A live vote was posted as `message` and is accepting reactions.
    VoteOpened { message: MessageId, poll: String },
}

pub struct CommandHandler {
    syntax: CommandConfig,
    roles: RoleConfig,
    weeks: WeekRange,
    store: Arc<AggregateStore>,
    registry: Arc<LiveVoteRegistry>,
}

impl CommandHandler {
    pub fn new(config: &Config, store: Arc<AggregateStore>, registry: Arc<LiveVoteRegistry>) -> Self {
        CommandHandler {
            syntax: config.commands.clone(),
            roles: config.roles.clone(),
            weeks: config.weeks,
            store,
            registry,
        }
    }

    /// The argument text if `content` invokes the command (by name or
    /// alias, case-insensitively), else `None`.
    pub fn match_invocation<'c>(&self, content: &'c str) -> Option<&'c str> {
        let rest = content.trim_start().strip_prefix(&self.syntax.prefix)?;
        let (word, args) = rest
            .split_once(char::is_whitespace)
            .unwrap_or((rest, ""));
        let named = std::iter::once(&self.syntax.name)
            .chain(&self.syntax.aliases)
            .any(|n| n.eq_ignore_ascii_case(word));
        named.then(|| args.trim())
    }

    /// Handle a chat message end to end: parse, check, execute, reply and
    /// audit. Returns `None` when the message is not a command for us.
    pub async fn handle_message(
        &self,
        msg: &ChatMessage,
        platform: &dyn ChatPlatform,
    ) -> Option<Result<Response, CommandError>> {
        if msg.author.is_bot {
            return None;
        }
        let args = self.match_invocation(&msg.content)?;

        let result = self.run(msg, args, platform).await;
        self.deliver(msg, &result, platform).await;
        self.audit(msg, &result);
        Some(result)
    }

    async fn run(
        &self,
        msg: &ChatMessage,
        args: &str,
        platform: &dyn ChatPlatform,
    ) -> Result<Response, CommandError> {
        if msg.guild_id.is_none() {
            return Err(CommandError::GuildOnly);
        }
        if let Some(access) = &self.roles.access {
            if !has_any_role(&msg.author.roles, std::slice::from_ref(access)) {
                return Err(CommandError::AccessDenied);
            }
        }
        let command = GovCommand::parse(args, self.weeks)?;
        self.execute(command, msg, platform).await
    }

    /// Run a parsed command on behalf of `msg`'s author.
    pub async fn execute(
        &self,
        command: GovCommand,
        msg: &ChatMessage,
        platform: &dyn ChatPlatform,
    ) -> Result<Response, CommandError> {
        let caller = &msg.author;
        debug!(command = command.name(), caller = %caller.id, "executing command");
        match command {
            GovCommand::Register { group, target } => {
                let who = self.target_or_caller(target, msg, "register other users")?;
                self.store.register(&group, who);
                let text = if who == caller.id {
                    format!("{} registered for '{group}'.", caller.username)
                } else {
                    let name = display_name_or_id(platform, who).await;
                    format!("{name} was registered for '{group}' by {}.", caller.username)
                };
                Ok(Response::Reply(text))
            }

            GovCommand::Unregister { group, target } => {
                let who = self.target_or_caller(target, msg, "unregister other users")?;
                let removed = self.store.unregister(&group, who);
                let name = if who == caller.id {
                    caller.username.clone()
                } else {
                    display_name_or_id(platform, who).await
                };
                let text = match (removed, who == caller.id) {
                    (true, true) => format!("{name} removed from '{group}'."),
                    (true, false) => {
                        format!("{name} was removed from '{group}' by {}.", caller.username)
                    }
                    (false, _) => format!("{name} was not registered in '{group}'."),
                };
                Ok(Response::Reply(text))
            }

            GovCommand::List { group: None } => {
                let groups = self.store.list_groups();
                if groups.is_empty() {
                    return Ok(Response::Reply("No registration groups found.".into()));
                }
                let mut lines = Vec::with_capacity(groups.len());
                for group in groups {
                    let members = self.store.members(&group);
                    let names = mention_all(platform, members).await;
                    lines.push(format!("{group}: {}", names.join(", ")));
                }
                Ok(Response::Reply(format!("Groups:\n{}", lines.join("\n"))))
            }

            GovCommand::List { group: Some(group) } => {
                let members = self.store.members(&group);
                if members.is_empty() {
                    return Ok(Response::Reply(format!(
                        "No members registered in '{group}'."
                    )));
                }
                let names = mention_all(platform, members).await;
                Ok(Response::Reply(format!(
                    "Registered in '{group}':\n{}",
                    names.join("\n")
                )))
            }

            GovCommand::Raffle { group, winners } => {
                let members = self.store.members(&group);
                if members.is_empty() {
                    return Ok(Response::Reply(format!("No members to raffle in '{group}'.")));
                }
                let picked = raffle::select_winners(&members, winners);
                info!(%group, winners = picked.len(), "raffle drawn");
                let names = mention_all(platform, picked).await;
                Ok(Response::Reply(format!(
                    "Raffle winners for '{group}': {}",
                    names.join(", ")
                )))
            }

            GovCommand::Vote { poll, option } => {
                self.store.cast_vote(&poll, &option, caller.id);
                Ok(Response::Reply(format!(
                    "{} voted for '{option}' in '{poll}'.",
                    caller.username
                )))
            }

            GovCommand::VoteList { poll } => {
                let ballots = self.store.ballots(&poll);
                if ballots.is_empty() {
                    return Ok(Response::Reply(format!("No votes recorded in '{poll}'.")));
                }
                let mut lines = Vec::with_capacity(ballots.len());
                for (option, voters) in ballots {
                    let label = option_label(platform, &option).await;
                    let names = mention_all(platform, voters).await;
                    lines.push(format!("{label}: {}", names.join(", ")));
                }
                Ok(Response::Reply(format!(
                    "Votes in '{poll}':\n{}",
                    lines.join("\n")
                )))
            }

            GovCommand::VoteResult { poll } => {
                let mut tally: Vec<(String, usize)> = self.store.tally(&poll).into_iter().collect();
                if tally.is_empty() {
                    return Ok(Response::Reply(format!("No votes recorded in '{poll}'.")));
                }
                tally.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| names::cmp_ignore_case(&a.0, &b.0)));
                let mut lines = Vec::with_capacity(tally.len());
                for (option, count) in tally {
                    let label = option_label(platform, &option).await;
                    let noun = if count == 1 { "vote" } else { "votes" };
                    lines.push(format!("{label}: {count} {noun}"));
                }
                Ok(Response::Reply(format!(
                    "Results for '{poll}':\n{}",
                    lines.join("\n")
                )))
            }

            GovCommand::VoteStart { group } => self.start_live_vote(group, msg, platform).await,
        }
    }

    fn target_or_caller(
        &self,
        target: Option<UserId>,
        msg: &ChatMessage,
        action: &'static str,
    ) -> Result<UserId, CommandError> {
        match target {
            Some(other) if other != msg.author.id => {
                if has_any_role(&msg.author.roles, &self.roles.admins) {
                    Ok(other)
                } else {
                    Err(CommandError::NotPermitted(action))
                }
            }
            _ => Ok(msg.author.id),
        }
    }

    /// Post the candidate list for `group`, open a live vote on that message
    /// and seed one glyph per candidate.
    async fn start_live_vote(
        &self,
        group: String,
        msg: &ChatMessage,
        platform: &dyn ChatPlatform,
    ) -> Result<Response, CommandError> {
        if !has_any_role(&msg.author.roles, &self.roles.vote_starters) {
            return Err(CommandError::NotPermitted("start a vote"));
        }

        let members = self.store.members(&group);
        if members.len() < 2 {
            return Err(CommandError::NotEnoughCandidates(group));
        }
        if members.len() > MAX_CANDIDATES {
            warn!(%group, members = members.len(), "live vote limited to the first {MAX_CANDIDATES} members");
        }
        let candidates: Vec<UserId> = members.into_iter().take(MAX_CANDIDATES).collect();

        let mut text = format!("Vote started for '{group}':");
        for (idx, name) in mention_all(platform, candidates.clone())
            .await
            .into_iter()
            .enumerate()
        {
            text.push_str(&format!("\n{}. {name}", idx + 1));
        }

        let message = platform
            .post_reply(msg.channel_id, &text)
            .await
            .map_err(CommandError::Platform)?;

        // Open before seeding so early reactions already count.
        self.registry.open(message, group.clone(), candidates.clone())?;
        info!(poll = %group, %message, candidates = candidates.len(), "live vote opened");

        for position in 1..=candidates.len() {
            let Some(emoji) = glyph::for_position(position) else {
                break;
            };
            if let Err(e) = platform.add_reaction(msg.channel_id, message, emoji).await {
                warn!(%message, "failed to seed reaction {emoji}: {e}");
            }
        }

        Ok(Response::VoteOpened {
            message,
            poll: group,
        })
    }

    /// Reply text for a failed command.
    pub fn render_error(&self, err: &CommandError) -> String {
        let invocation = format!("{}{}", self.syntax.prefix, self.syntax.name);
        match err {
            CommandError::Usage(args) => format!("Usage: {invocation} {args}"),
            CommandError::UnknownSubcommand(_) => {
                format!("Unknown subcommand. Usage: {invocation} {SUBCOMMANDS}")
            }
            other => other.to_string(),
        }
    }

    async fn deliver(
        &self,
        msg: &ChatMessage,
        result: &Result<Response, CommandError>,
        platform: &dyn ChatPlatform,
    ) {
        let outcome = match result {
            Ok(Response::VoteOpened { .. }) => return,
            Ok(Response::Reply(text)) => platform.post_reply(msg.channel_id, text).await.map(drop),
            Err(CommandError::AccessDenied) => {
                platform
                    .add_reaction(msg.channel_id, msg.message_id, ACCESS_DENIED_GLYPH)
                    .await
            }
            Err(e) => platform
                .post_reply(msg.channel_id, &self.render_error(e))
                .await
                .map(drop),
        };
        if let Err(e) = outcome {
            warn!(channel = %msg.channel_id, "failed to answer command: {e}");
        }
    }

    fn audit(&self, msg: &ChatMessage, result: &Result<Response, CommandError>) {
        let server = msg.guild_name.as_deref().unwrap_or("direct message");
        let (success, summary) = match result {
            Ok(Response::Reply(text)) => (true, text.clone()),
            Ok(Response::VoteOpened { message, poll }) => {
                (true, format!("live vote '{poll}' opened on message {message}"))
            }
            Err(e) => (false, self.render_error(e)),
        };
        info!(
            target: "rollcall::audit",
            server,
            user = %msg.author.username,
            user_id = %msg.author.id,
            command = %msg.content,
            success,
            result = %summary,
            "command"
        );
    }
}

async fn mention_all(
    platform: &dyn ChatPlatform,
    users: impl IntoIterator<Item = UserId>,
) -> Vec<String> {
    let mut names = Vec::new();
    for user in users {
        names.push(format!("@{}", display_name_or_id(platform, user).await));
    }
    names
}

/// Live votes store the candidate's id as the option; show a name instead.
async fn option_label(platform: &dyn ChatPlatform, option: &str) -> String {
    match option.parse::<UserId>() {
        Ok(user) => match platform.resolve_display_name(user).await {
            Ok(name) => format!("@{name}"),
            Err(_) => option.to_string(),
        },
        Err(_) => option.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Author;
    use async_trait::async_trait;
    use rollcall_core::{ChannelId, ReactionEvent, ReactionHandler, ReactionOutcome, StorePaths};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const WEEKS: WeekRange = WeekRange { min: 1, max: 53 };

    /// Records every outbound call; knows a few display names.
    #[derive(Default)]
    struct RecordingPlatform {
        names: HashMap<UserId, String>,
        replies: Mutex<Vec<String>>,
        reactions: Mutex<Vec<(MessageId, String)>>,
    }

    impl RecordingPlatform {
        fn with_names(names: &[(u64, &str)]) -> Self {
            RecordingPlatform {
                names: names
                    .iter()
                    .map(|(id, n)| (UserId(*id), n.to_string()))
                    .collect(),
                ..Default::default()
            }
        }

        fn replies(&self) -> Vec<String> {
            self.replies.lock().unwrap().clone()
        }

        fn last_reply(&self) -> String {
            self.replies().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        async fn resolve_display_name(&self, user: UserId) -> anyhow::Result<String> {
            self.names
                .get(&user)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown user {user}"))
        }

        async fn post_reply(&self, _channel: ChannelId, text: &str) -> anyhow::Result<MessageId> {
            let mut replies = self.replies.lock().unwrap();
            replies.push(text.to_string());
            Ok(MessageId(1000 + replies.len() as u64))
        }

        async fn add_reaction(
            &self,
            _channel: ChannelId,
            message: MessageId,
            glyph: &str,
        ) -> anyhow::Result<()> {
            self.reactions
                .lock()
                .unwrap()
                .push((message, glyph.to_string()));
            Ok(())
        }

        async fn remove_reaction(
            &self,
            _channel: ChannelId,
            _message: MessageId,
            _glyph: &str,
            _user: UserId,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<AggregateStore>,
        registry: Arc<LiveVoteRegistry>,
        handler: CommandHandler,
    }

    fn test_config() -> Config {
        toml::from_str(include_str!("../defaults/rollcall.toml")).unwrap()
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AggregateStore::new(StorePaths::in_dir(dir.path())));
        let registry = Arc::new(LiveVoteRegistry::new());
        let handler = CommandHandler::new(&test_config(), Arc::clone(&store), Arc::clone(&registry));
        Fixture {
            _dir: dir,
            store,
            registry,
            handler,
        }
    }

    fn message(author: u64, username: &str, roles: &[&str], content: &str) -> ChatMessage {
        ChatMessage {
            channel_id: ChannelId(7),
            message_id: MessageId(70),
            guild_id: Some(1),
            guild_name: Some("S555".into()),
            author: Author {
                id: UserId(author),
                username: username.into(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
                is_bot: false,
            },
            content: content.into(),
        }
    }

    const ACCESS: &str = "SOS-S555-Access";

    // -- parsing -----------------------------------------------------------

    #[test]
    fn week_numbers_normalize() {
        for raw in ["21", "week21", "Week21", "w21", "wk21x"] {
            assert_eq!(normalize_week(raw, WEEKS).as_deref(), Some("week21"), "{raw}");
        }
        assert_eq!(normalize_week("week 5", WEEKS).as_deref(), Some("week5"));
        for raw in ["0", "54", "week", "", "99999999999999999999"] {
            assert_eq!(normalize_week(raw, WEEKS), None, "{raw}");
        }
    }

    #[test]
    fn targets_accept_mentions_and_ids() {
        assert_eq!(parse_target("<@123>").unwrap(), UserId(123));
        assert_eq!(parse_target("<@!123>").unwrap(), UserId(123));
        assert_eq!(parse_target("123").unwrap(), UserId(123));
        assert!(matches!(parse_target("bob"), Err(CommandError::UnknownTarget)));
    }

    #[test]
    fn parses_every_subcommand() {
        let parse = |s: &str| GovCommand::parse(s, WEEKS).unwrap();
        assert_eq!(
            parse("register 21"),
            GovCommand::Register {
                group: "week21".into(),
                target: None
            }
        );
        assert_eq!(
            parse("UNREGISTER week3 <@42>"),
            GovCommand::Unregister {
                group: "week3".into(),
                target: Some(UserId(42))
            }
        );
        assert_eq!(parse("list"), GovCommand::List { group: None });
        assert_eq!(
            parse("list 4"),
            GovCommand::List {
                group: Some("week4".into())
            }
        );
        assert_eq!(
            parse("raffle 21 3"),
            GovCommand::Raffle {
                group: "week21".into(),
                winners: 3
            }
        );
        assert_eq!(
            parse("raffle vip lots"),
            GovCommand::Raffle {
                group: "vip".into(),
                winners: 1
            }
        );
        assert_eq!(
            parse("vote p1 option a"),
            GovCommand::Vote {
                poll: "p1".into(),
                option: "option a".into()
            }
        );
        assert_eq!(parse("vote list p1"), GovCommand::VoteList { poll: "p1".into() });
        assert_eq!(parse("vote result p1"), GovCommand::VoteResult { poll: "p1".into() });
        assert_eq!(
            parse("vote start 21"),
            GovCommand::VoteStart {
                group: "week21".into()
            }
        );
        assert_eq!(
            parse("vote week21"),
            GovCommand::VoteStart {
                group: "week21".into()
            }
        );
    }

    #[test]
    fn parse_errors() {
        let parse = |s: &str| GovCommand::parse(s, WEEKS);
        assert!(matches!(parse(""), Err(CommandError::Usage(_))));
        assert!(matches!(parse("register"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("register 60"), Err(CommandError::InvalidWeek { .. })));
        assert!(matches!(parse("register 21 bob"), Err(CommandError::UnknownTarget)));
        assert!(matches!(parse("vote"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("vote p1"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("vote a|b x"), Err(CommandError::InvalidName(_))));
        assert!(matches!(parse("dance"), Err(CommandError::UnknownSubcommand(_))));
    }

    #[test]
    fn invocation_matches_name_and_alias() {
        let fx = fixture();
        assert_eq!(fx.handler.match_invocation("!gov list 21"), Some("list 21"));
        assert_eq!(fx.handler.match_invocation("  !GOV list"), Some("list"));
        assert_eq!(fx.handler.match_invocation("!government"), Some(""));
        assert_eq!(fx.handler.match_invocation("!governor list"), None);
        assert_eq!(fx.handler.match_invocation("gov list"), None);
    }

    // -- execution ---------------------------------------------------------

    #[tokio::test]
    async fn register_and_list() {
        let fx = fixture();
        let platform = RecordingPlatform::with_names(&[(10, "ana"), (20, "bo")]);

        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov register 21"), &platform)
            .await;
        fx.handler
            .handle_message(&message(20, "bo", &[ACCESS], "!gov register week21"), &platform)
            .await;
        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov list 21"), &platform)
            .await;

        assert_eq!(
            platform.replies(),
            vec![
                "ana registered for 'week21'.",
                "bo registered for 'week21'.",
                "Registered in 'week21':\n@ana\n@bo",
            ]
        );
        assert_eq!(fx.store.member_count("week21"), 2);
    }

    #[tokio::test]
    async fn listing_all_groups_falls_back_to_ids() {
        let fx = fixture();
        let platform = RecordingPlatform::with_names(&[(10, "ana")]);
        fx.store.register("week2", UserId(10));
        fx.store.register("week1", UserId(99));

        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov list"), &platform)
            .await;

        assert_eq!(platform.last_reply(), "Groups:\nweek1: @99\nweek2: @ana");
    }

    #[tokio::test]
    async fn registering_others_needs_admin_role() {
        let fx = fixture();
        let platform = RecordingPlatform::with_names(&[(42, "kim")]);

        let denied = fx
            .handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov register 21 <@42>"), &platform)
            .await;
        assert!(matches!(denied, Some(Err(CommandError::NotPermitted(_)))));
        assert!(fx.store.members("week21").is_empty());
        assert_eq!(
            platform.last_reply(),
            "You don't have permission to register other users."
        );

        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS, "R4"], "!gov register 21 <@42>"), &platform)
            .await;
        assert!(fx.store.members("week21").contains(&UserId(42)));
        assert_eq!(platform.last_reply(), "kim was registered for 'week21' by ana.");
    }

    #[tokio::test]
    async fn unregister_reports_missing_membership() {
        let fx = fixture();
        let platform = RecordingPlatform::default();
        fx.store.register("week21", UserId(10));

        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov unregister 21"), &platform)
            .await;
        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov unregister 21"), &platform)
            .await;

        assert_eq!(
            platform.replies(),
            vec![
                "ana removed from 'week21'.",
                "ana was not registered in 'week21'.",
            ]
        );
        assert!(fx.store.list_groups().is_empty());
    }

    #[tokio::test]
    async fn missing_access_role_gets_a_cross_and_no_reply() {
        let fx = fixture();
        let platform = RecordingPlatform::default();

        let result = fx
            .handler
            .handle_message(&message(10, "ana", &["R5"], "!gov register 21"), &platform)
            .await;

        assert!(matches!(result, Some(Err(CommandError::AccessDenied))));
        assert!(platform.replies().is_empty());
        assert_eq!(
            *platform.reactions.lock().unwrap(),
            vec![(MessageId(70), ACCESS_DENIED_GLYPH.to_string())]
        );
        assert!(fx.store.list_groups().is_empty());
    }

    #[tokio::test]
    async fn direct_messages_and_bots_are_refused() {
        let fx = fixture();
        let platform = RecordingPlatform::default();

        let mut dm = message(10, "ana", &[ACCESS], "!gov list");
        dm.guild_id = None;
        let result = fx.handler.handle_message(&dm, &platform).await;
        assert!(matches!(result, Some(Err(CommandError::GuildOnly))));

        let mut bot = message(10, "other-bot", &[ACCESS], "!gov list");
        bot.author.is_bot = true;
        assert!(fx.handler.handle_message(&bot, &platform).await.is_none());
    }

    #[tokio::test]
    async fn usage_replies_name_the_command() {
        let fx = fixture();
        let platform = RecordingPlatform::default();

        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov"), &platform)
            .await;
        fx.handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov dance"), &platform)
            .await;

        assert_eq!(
            platform.replies(),
            vec![
                "Usage: !gov <register|unregister|list|raffle|vote> [args]",
                "Unknown subcommand. Usage: !gov <register|unregister|list|raffle|vote> [args]",
            ]
        );
    }

    #[tokio::test]
    async fn raffle_draws_from_the_group() {
        let fx = fixture();
        let platform = RecordingPlatform::with_names(&[(1, "a"), (2, "b"), (3, "c")]);
        for id in 1..=3 {
            fx.store.register("week9", UserId(id));
        }

        fx.handler
            .handle_message(&message(1, "a", &[ACCESS], "!gov raffle 9 5"), &platform)
            .await;
        let reply = platform.last_reply();
        let winners = reply
            .strip_prefix("Raffle winners for 'week9': ")
            .expect("raffle reply");
        let mut names: Vec<&str> = winners.split(", ").collect();
        names.sort();
        assert_eq!(names, vec!["@a", "@b", "@c"]);

        fx.handler
            .handle_message(&message(1, "a", &[ACCESS], "!gov raffle week10"), &platform)
            .await;
        assert_eq!(platform.last_reply(), "No members to raffle in 'week10'.");
    }

    #[tokio::test]
    async fn text_votes_switch_and_tally() {
        let fx = fixture();
        let platform = RecordingPlatform::default();

        for (voter, content) in [
            (5, "!gov vote p1 A"),
            (6, "!gov vote p1 A"),
            (5, "!gov vote p1 b"),
        ] {
            fx.handler
                .handle_message(&message(voter, "v", &[ACCESS], content), &platform)
                .await;
        }
        fx.handler
            .handle_message(&message(5, "v", &[ACCESS], "!gov vote result P1"), &platform)
            .await;

        assert_eq!(platform.last_reply(), "Results for 'P1':\nA: 1 vote\nb: 1 vote");
        fx.handler
            .handle_message(&message(5, "v", &[ACCESS], "!gov vote list p1"), &platform)
            .await;
        assert_eq!(platform.last_reply(), "Votes in 'p1':\nA: @6\nb: @5");
    }

    #[tokio::test]
    async fn live_vote_needs_privilege_and_two_members() {
        let fx = fixture();
        let platform = RecordingPlatform::default();
        fx.store.register("week21", UserId(10));

        let result = fx
            .handler
            .handle_message(&message(10, "ana", &[ACCESS], "!gov vote start 21"), &platform)
            .await;
        assert!(matches!(result, Some(Err(CommandError::NotPermitted(_)))));

        let result = fx
            .handler
            .handle_message(&message(10, "ana", &[ACCESS, "R5"], "!gov vote 21"), &platform)
            .await;
        assert!(matches!(result, Some(Err(CommandError::NotEnoughCandidates(_)))));
        assert_eq!(
            platform.last_reply(),
            "Need at least two registered users for 'week21' to start a vote."
        );
        assert_eq!(fx.registry.open_count(), 0);
    }

    #[tokio::test]
    async fn live_vote_opens_and_counts_reactions() {
        let fx = fixture();
        let platform = RecordingPlatform::with_names(&[(10, "ana"), (20, "bo")]);
        fx.store.register("week21", UserId(10));
        fx.store.register("week21", UserId(20));

        let result = fx
            .handler
            .handle_message(&message(1, "boss", &[ACCESS, "r5"], "!gov vote start 21"), &platform)
            .await;
        let Some(Ok(Response::VoteOpened { message: vote_msg, poll })) = result else {
            panic!("expected a live vote, got {result:?}");
        };
        assert_eq!(poll, "week21");
        assert_eq!(platform.replies(), vec!["Vote started for 'week21':\n1. @ana\n2. @bo"]);
        assert_eq!(
            *platform.reactions.lock().unwrap(),
            vec![
                (vote_msg, "1️⃣".to_string()),
                (vote_msg, "2️⃣".to_string()),
            ]
        );

        let reactions = ReactionHandler::new(Arc::clone(&fx.store), Arc::clone(&fx.registry));
        let outcome = reactions.apply(&ReactionEvent {
            channel_id: ChannelId(7),
            message_id: vote_msg,
            voter_id: UserId(5),
            glyph: "2️⃣".into(),
            reactor_is_self: false,
        });
        assert!(matches!(outcome, ReactionOutcome::Counted { candidate: UserId(20), .. }));
        assert_eq!(fx.store.tally("week21").get("20"), Some(&1));
    }

    #[tokio::test]
    async fn live_vote_offers_at_most_nine_candidates() {
        let fx = fixture();
        let platform = RecordingPlatform::default();
        for id in 1..=12 {
            fx.store.register("week3", UserId(id));
        }

        let result = fx
            .handler
            .handle_message(&message(1, "boss", &[ACCESS, "R5"], "!gov vote start 3"), &platform)
            .await;
        let Some(Ok(Response::VoteOpened { message: vote_msg, .. })) = result else {
            panic!("expected a live vote");
        };

        let vote = fx.registry.lookup(vote_msg).unwrap();
        assert_eq!(vote.candidates, (1..=9).map(UserId).collect::<Vec<_>>());
        assert_eq!(platform.reactions.lock().unwrap().len(), 9);
    }
}
