/// Numeric replies and the welcome burst.
use super::config::Config;
use super::message::Message;

/// Numeric replies this server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Numeric {
    RplWelcome,
    RplYourHost,
    RplCreated,
    RplMyInfo,
    RplNamReply,
    RplEndOfNames,
    RplMotd,
    RplMotdStart,
    RplEndOfMotd,
    ErrNoSuchNick,
    ErrNoSuchChannel,
    ErrCannotSendToChan,
    ErrNoRecipient,
    ErrNoTextToSend,
    ErrUnknownCommand,
    ErrNoNicknameGiven,
    ErrNicknameInUse,
    ErrNotOnChannel,
    ErrNeedMoreParams,
    ErrAlreadyRegistred,
}

impl Numeric {
    pub fn code(self) -> &'static str {
        match self {
            Self::RplWelcome => "001",
            Self::RplYourHost => "002",
            Self::RplCreated => "003",
            Self::RplMyInfo => "004",
            Self::RplNamReply => "353",
            Self::RplEndOfNames => "366",
            Self::RplMotd => "372",
            Self::RplMotdStart => "375",
            Self::RplEndOfMotd => "376",
            Self::ErrNoSuchNick => "401",
            Self::ErrNoSuchChannel => "403",
            Self::ErrCannotSendToChan => "404",
            Self::ErrNoRecipient => "411",
            Self::ErrNoTextToSend => "412",
            Self::ErrUnknownCommand => "421",
            Self::ErrNoNicknameGiven => "431",
            Self::ErrNicknameInUse => "433",
            Self::ErrNotOnChannel => "442",
            Self::ErrNeedMoreParams => "461",
            Self::ErrAlreadyRegistred => "462",
        }
    }

    /// Default human-readable text, sent as the trailing parameter.
    pub fn text(self) -> &'static str {
        match self {
            Self::RplWelcome => "Welcome to the Internet Relay Network",
            Self::RplYourHost => "Your host is running cove",
            Self::RplCreated => "This server was created at startup",
            Self::RplMyInfo => "",
            Self::RplNamReply => "",
            Self::RplEndOfNames => "End of NAMES list",
            Self::RplMotd => "",
            Self::RplMotdStart => "- Message of the day -",
            Self::RplEndOfMotd => "End of MOTD command",
            Self::ErrNoSuchNick => "No such nick/channel",
            Self::ErrNoSuchChannel => "No such channel",
            Self::ErrCannotSendToChan => "Cannot send to channel",
            Self::ErrNoRecipient => "No recipient given",
            Self::ErrNoTextToSend => "No text to send",
            Self::ErrUnknownCommand => "Unknown command",
            Self::ErrNoNicknameGiven => "No nickname given",
            Self::ErrNicknameInUse => "Nickname is already in use",
            Self::ErrNotOnChannel => "You're not on that channel",
            Self::ErrNeedMoreParams => "Not enough parameters",
            Self::ErrAlreadyRegistred => "Unauthorized command (already registered)",
        }
    }
}

/// Build a server-originated numeric for `target` (`*` before a nickname is
/// known). `args` go between the target and the text.
pub fn reply(config: &Config, target: &str, numeric: Numeric, args: &[&str]) -> Message {
    let mut params = Vec::with_capacity(args.len() + 1);
    params.push(target);
    params.extend_from_slice(args);
    Message::new(numeric.code())
        .with_prefix(config.name.as_str())
        .with_params(params)
        .with_trailing(numeric.text())
}

/// The 001-004 registration burst followed by the MOTD.
pub fn welcome(config: &Config, nick: &str) -> Vec<Message> {
    let mut burst = vec![
        reply(config, nick, Numeric::RplWelcome, &[]).with_trailing(format!(
            "Welcome to the {} Internet Relay Network {nick}",
            config.network
        )),
        reply(config, nick, Numeric::RplYourHost, &[]).with_trailing(format!(
            "Your host is {}, running cove-{}",
            config.name,
            env!("CARGO_PKG_VERSION")
        )),
        reply(config, nick, Numeric::RplCreated, &[]),
        Message::new(Numeric::RplMyInfo.code())
            .with_prefix(config.name.as_str())
            .with_params([
                nick,
                config.name.as_str(),
                concat!("cove-", env!("CARGO_PKG_VERSION")),
                "o",
                "o",
            ]),
    ];
    burst.extend(motd(config, nick));
    burst
}

/// 375, one 372 per configured line, 376.
pub fn motd(config: &Config, nick: &str) -> Vec<Message> {
    let mut lines = Vec::with_capacity(config.motd.len() + 2);
    lines.push(
        reply(config, nick, Numeric::RplMotdStart, &[])
            .with_trailing(format!("- {} Message of the day -", config.name)),
    );
    for line in &config.motd {
        lines.push(reply(config, nick, Numeric::RplMotd, &[]).with_trailing(format!("- {line}")));
    }
    lines.push(reply(config, nick, Numeric::RplEndOfMotd, &[]));
    lines
}
