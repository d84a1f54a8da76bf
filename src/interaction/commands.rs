//! Built-in chat commands.
//!
//! Commands start with the configured prefix (`!` by default). `rooms`, `join`,
//! and `leave` are reserved for the usernames listed in `bot_admins`.

use async_trait::async_trait;

use crate::{
    prelude::*,
    service::backend::{KchatBackend, identity::Identifier, message::Message},
};

use super::GenericPlugin;

const HELP: &str = "Available commands:\n\
    - `help`: show this message\n\
    - `echo <text>`: repeat the text\n\
    - `whoami`: show what the bot knows about you\n\
    - `rooms` (admin): list the rooms the bot is in\n\
    - `join <~room>` (admin): join (or create) a room\n\
    - `leave [~room]` (admin): leave a room, by default the current one";

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Echo(String),
    Whoami,
    Rooms,
    Join(String),
    Leave(Option<String>),
    Unknown(String),
}

impl Command {
    /// Parses `body` if it starts with `prefix`.
    pub fn parse(prefix: &str, body: &str) -> Option<Self> {
        let rest = body.trim().strip_prefix(prefix)?.trim();
        if rest.is_empty() {
            return None;
        }

        let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let args = args.trim();

        let command = match name.to_ascii_lowercase().as_str() {
            "help" => Command::Help,
            "echo" => Command::Echo(args.to_string()),
            "whoami" => Command::Whoami,
            "rooms" => Command::Rooms,
            "join" if !args.is_empty() => Command::Join(args.to_string()),
            "leave" => Command::Leave(Some(args.to_string()).filter(|a| !a.is_empty())),
            _ => Command::Unknown(name.to_string()),
        };

        Some(command)
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Command::Rooms | Command::Join(_) | Command::Leave(_))
    }
}

pub struct CommandsPlugin {
    config: Config,
}

impl CommandsPlugin {
    pub fn new(config: &Config) -> Self {
        Self { config: config.clone() }
    }

    async fn reply(&self, bot: &KchatBackend, message: &Message, text: &str) -> Void {
        let reply = bot.build_reply(message, text, false, message.is_threaded());
        bot.send_message(&reply).await
    }

    async fn execute(&self, bot: &KchatBackend, message: &Message, command: Command) -> Res<String> {
        let sender = message.frm.as_ref().and_then(Identifier::as_person).ok_or_else(|| anyhow!("Command without a sender."))?;

        let text = match command {
            Command::Help => HELP.to_string(),
            Command::Echo(text) => text,
            Command::Whoami => {
                let fullname = sender.fullname().await.unwrap_or_default();
                let email = sender.email().await.unwrap_or_default();
                format!("You are {} (`{}`).\nName: {}\nEmail: {}", sender.person().await, sender.userid(), fullname, email)
            }
            Command::Rooms => {
                let rooms = bot.rooms().await?;
                let names: Vec<String> = rooms.iter().map(ToString::to_string).collect();

                if names.is_empty() {
                    "I am not in any room.".to_string()
                } else {
                    format!("I am in: {}", names.join(", "))
                }
            }
            Command::Join(name) => {
                let room = bot.query_room(&name).await?;
                room.join().await?;
                format!("Joined {room}.")
            }
            Command::Leave(name) => {
                let room = match (name, &message.frm) {
                    (Some(name), _) => bot.query_room(&name).await?,
                    (None, Some(Identifier::Occupant(occupant))) => occupant.room().clone(),
                    (None, _) => return Ok("Tell me which room to leave, e.g. `leave ~town-square`.".to_string()),
                };

                room.leave().await?;
                format!("Left {room}.")
            }
            Command::Unknown(name) => format!("Unknown command `{name}`. Type `{}help` for the list of commands.", self.config.bot_prefix),
        };

        Ok(text)
    }
}

#[async_trait]
impl GenericPlugin for CommandsPlugin {
    fn name(&self) -> &str {
        "commands"
    }

    #[instrument(skip_all)]
    async fn on_message(&self, bot: &KchatBackend, message: &Message) -> Void {
        let Some(command) = Command::parse(&self.config.bot_prefix, &message.body) else {
            return Ok(());
        };

        debug!("Received command {:?}", command);

        if command.requires_admin() {
            let Some(sender) = message.frm.as_ref().and_then(Identifier::as_person) else {
                return Ok(());
            };

            let username = sender.username().await;
            if !self.config.is_admin(&username) {
                warn!("User `{}` tried to run admin command {:?}.", username, command);
                return self.reply(bot, message, "This command is reserved for bot admins.").await;
            }
        }

        let text = match self.execute(bot, message, command).await {
            Ok(text) => text,
            Err(err) => {
                error!("Command failed: {:#}", err);
                format!("Sorry, that did not work: {err}")
            }
        };

        self.reply(bot, message, &text).await
    }
}
