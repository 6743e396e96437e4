/// Per-connection protocol state machine.
///
/// A connection starts `Fresh`, reserves a nickname (`FreshUser`), supplies
/// its user info (`Registered`), and ends `Closed`. Each transition takes the
/// registry slot at most once, does its work, and gives the slot back before
/// returning the next state. Replies are queued on the connection and never
/// awaited while the slot is held.
use tracing::debug;

use super::config::Config;
use super::message::Message;
use super::numeric::{self, Numeric};
use super::channel_log::PendingWrite;
use super::state::{ChannelId, Registry, SharedRegistry, Sink, UserId};

/// What the handler needs from the transport.
pub trait Connection {
    /// Queue a line for this connection.
    fn send(&self, msg: Message);
    /// A sink the registry can keep to reach this connection later.
    fn sink(&self) -> Sink;
    /// Terminate the transport and release it.
    fn kill(&mut self);
}

/// The protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handler {
    /// Nothing known about the client yet.
    #[default]
    Fresh,
    /// Nickname reserved, waiting for `USER`.
    FreshUser { user: UserId },
    /// Fully registered.
    Registered { user: UserId },
    /// Done; further input is ignored.
    Closed,
}

impl Handler {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The user this connection owns, if it got far enough to have one.
    pub fn user(&self) -> Option<UserId> {
        match self {
            Self::FreshUser { user } | Self::Registered { user } => Some(*user),
            Self::Fresh | Self::Closed => None,
        }
    }

    /// Feed one inbound message and return the next state.
    pub async fn handle<C: Connection>(
        self,
        registry: &SharedRegistry,
        conn: &mut C,
        msg: &Message,
    ) -> Handler {
        match self {
            Self::Fresh => fresh(registry, conn, msg).await,
            Self::FreshUser { user } => fresh_user(user, registry, conn, msg).await,
            Self::Registered { user } => registered(user, registry, conn, msg).await,
            Self::Closed => Self::Closed,
        }
    }

    /// The transport went away without a `QUIT`: undo whatever this
    /// connection reserved, then kill the transport.
    pub async fn closed<C: Connection>(self, registry: &SharedRegistry, conn: &mut C) {
        match self {
            Self::Fresh => conn.kill(),
            Self::FreshUser { user } | Self::Registered { user } => {
                registry.acquire().await.remove_user(user);
                conn.kill();
            }
            Self::Closed => {}
        }
    }
}

async fn fresh<C: Connection>(registry: &SharedRegistry, conn: &mut C, msg: &Message) -> Handler {
    let config = registry.config();

    match msg.verb().as_str() {
        "QUIT" => {
            conn.kill();
            Handler::Closed
        }
        "NICK" => {
            let nick = msg.params.first().map(String::as_str).unwrap_or(msg.lax_trailing(0));
            if nick.is_empty() {
                conn.send(numeric::reply(config, "*", Numeric::ErrNoNicknameGiven, &[]));
                return Handler::Fresh;
            }

            let reserved = {
                let mut reg = registry.acquire().await;
                let reserved = reg.new_user(nick);
                if let Some(id) = reserved {
                    if let Some(u) = reg.user_mut(id) {
                        u.attach(conn.sink());
                    }
                }
                reserved
            };

            match reserved {
                Some(user) => {
                    debug!(nick, "nickname reserved");
                    Handler::FreshUser { user }
                }
                None => {
                    conn.send(numeric::reply(config, "*", Numeric::ErrNicknameInUse, &[nick]));
                    Handler::Fresh
                }
            }
        }
        _ => Handler::Fresh,
    }
}

async fn fresh_user<C: Connection>(
    user: UserId,
    registry: &SharedRegistry,
    conn: &mut C,
    msg: &Message,
) -> Handler {
    let config = registry.config();

    match msg.verb().as_str() {
        "QUIT" => {
            registry.acquire().await.remove_user(user);
            conn.kill();
            Handler::Closed
        }
        "USER" => {
            let mut reg = registry.acquire().await;
            let Some(u) = reg.user_mut(user) else {
                conn.kill();
                return Handler::Closed;
            };

            let realname = msg.lax_trailing(3);
            if msg.params.len() < 3 || realname.is_empty() {
                u.send(numeric::reply(config, &u.nick, Numeric::ErrNeedMoreParams, &["USER"]));
                return Handler::FreshUser { user };
            }

            u.user = Some(msg.params[0].clone());
            u.realname = Some(realname.to_owned());
            debug!(nick = %u.nick, user = %msg.params[0], "registration complete");

            for line in numeric::welcome(config, &u.nick) {
                u.send(line);
            }
            Handler::Registered { user }
        }
        _ => Handler::FreshUser { user },
    }
}

async fn registered<C: Connection>(
    user: UserId,
    registry: &SharedRegistry,
    conn: &mut C,
    msg: &Message,
) -> Handler {
    let config = registry.config();
    let next = Handler::Registered { user };

    match msg.verb().as_str() {
        "QUIT" => {
            registry.acquire().await.remove_user(user);
            conn.kill();
            return Handler::Closed;
        }
        "PING" => {
            let token = msg.lax_trailing(0);
            conn.send(
                Message::new("PONG")
                    .with_prefix(config.name.as_str())
                    .with_params([config.name.as_str()])
                    .with_trailing(token),
            );
        }
        "PONG" | "NICK" => {}
        "USER" => {
            let reg = registry.acquire().await;
            if let Some(u) = reg.user(user) {
                u.send(numeric::reply(config, &u.nick, Numeric::ErrAlreadyRegistred, &[]));
            }
        }
        "JOIN" => join(user, registry, msg).await,
        "PART" => part(user, registry, msg).await,
        "PRIVMSG" => privmsg(user, registry, msg).await,
        verb => {
            let reg = registry.acquire().await;
            if let Some(u) = reg.user(user) {
                u.send(numeric::reply(config, &u.nick, Numeric::ErrUnknownCommand, &[verb]));
            }
        }
    }

    next
}

async fn join(user: UserId, registry: &SharedRegistry, msg: &Message) {
    let config = registry.config();
    let mut reg = registry.acquire().await;
    let Some(nick) = reg.user(user).map(|u| u.nick.clone()) else {
        return;
    };

    let Some(targets) = msg.params.first() else {
        if let Some(u) = reg.user(user) {
            u.send(numeric::reply(config, &nick, Numeric::ErrNeedMoreParams, &["JOIN"]));
        }
        return;
    };

    for name in targets.split(',').filter(|n| !n.is_empty()) {
        let channel = match reg.get_channel(name).map(|ch| ch.id()) {
            Some(id) => id,
            None => match reg.new_channel(name) {
                Some(id) => id,
                None => {
                    if let Some(u) = reg.user(user) {
                        u.send(numeric::reply(config, &nick, Numeric::ErrNoSuchChannel, &[name]));
                    }
                    continue;
                }
            },
        };

        if !reg.join_channel(channel, user) {
            continue;
        }

        let (Some(u), Some(ch)) = (reg.user(user), reg.channel(channel)) else {
            continue;
        };
        let join = Message::new("JOIN")
            .with_prefix(u.prefix(&config.name))
            .with_params([ch.name.as_str()]);
        reg.send_to_channel(channel, None, &join);

        for line in names(&reg, channel, &nick, config) {
            u.send(line);
        }
    }
}

/// 353/366 for `channel`.
fn names(reg: &Registry, channel: ChannelId, nick: &str, config: &Config) -> Vec<Message> {
    let Some(ch) = reg.channel(channel) else {
        return Vec::new();
    };
    let mut members: Vec<&str> = ch
        .members()
        .filter_map(|id| reg.user(id).map(|u| u.nick.as_str()))
        .collect();
    members.sort_unstable();

    vec![
        numeric::reply(config, nick, Numeric::RplNamReply, &["=", ch.name.as_str()])
            .with_trailing(members.join(" ")),
        numeric::reply(config, nick, Numeric::RplEndOfNames, &[ch.name.as_str()]),
    ]
}

async fn part(user: UserId, registry: &SharedRegistry, msg: &Message) {
    let config = registry.config();
    let mut reg = registry.acquire().await;
    let Some(nick) = reg.user(user).map(|u| u.nick.clone()) else {
        return;
    };

    let Some(targets) = msg.params.first() else {
        if let Some(u) = reg.user(user) {
            u.send(numeric::reply(config, &nick, Numeric::ErrNeedMoreParams, &["PART"]));
        }
        return;
    };
    let reason = msg.trailing.as_deref().unwrap_or(nick.as_str()).to_owned();

    for name in targets.split(',').filter(|n| !n.is_empty()) {
        let status = reg.get_channel(name).map(|ch| (ch.id(), ch.has_member(user)));
        let error = match status {
            None => Some(Numeric::ErrNoSuchChannel),
            Some((_, false)) => Some(Numeric::ErrNotOnChannel),
            Some((channel, true)) => {
                reg.part_channel(channel, user, &reason);
                None
            }
        };
        if let (Some(error), Some(u)) = (error, reg.user(user)) {
            u.send(numeric::reply(config, &nick, error, &[name]));
        }
    }
}

async fn privmsg(user: UserId, registry: &SharedRegistry, msg: &Message) {
    let pending = {
        let reg = registry.acquire().await;
        deliver_privmsg(&reg, user, msg, registry.config())
    };
    // Disk I/O waits until the slot is free again.
    if let Some(pending) = pending {
        pending.write();
    }
}

fn deliver_privmsg(
    reg: &Registry,
    user: UserId,
    msg: &Message,
    config: &Config,
) -> Option<PendingWrite> {
    let sender = reg.user(user)?;

    let Some(target) = msg.params.first() else {
        sender.send(numeric::reply(config, &sender.nick, Numeric::ErrNoRecipient, &["PRIVMSG"]));
        return None;
    };
    let text = msg.lax_trailing(1);
    if text.is_empty() {
        sender.send(numeric::reply(config, &sender.nick, Numeric::ErrNoTextToSend, &[]));
        return None;
    }

    let out = Message::new("PRIVMSG")
        .with_prefix(sender.prefix(&config.name))
        .with_params([target.as_str()])
        .with_trailing(text);

    if target.starts_with(['#', '&']) {
        match reg.get_channel(target) {
            None => {
                sender.send(numeric::reply(
                    config,
                    &sender.nick,
                    Numeric::ErrNoSuchChannel,
                    &[target.as_str()],
                ));
                None
            }
            Some(ch) if !ch.has_member(user) => {
                sender.send(numeric::reply(
                    config,
                    &sender.nick,
                    Numeric::ErrCannotSendToChan,
                    &[target.as_str()],
                ));
                None
            }
            Some(ch) => {
                reg.send_to_channel(ch.id(), Some(user), &out);
                reg.log_channel_message(ch.id(), &sender.nick, text)
            }
        }
    } else {
        match reg.get_user(target) {
            Some(recipient) => recipient.send(out),
            None => sender.send(numeric::reply(
                config,
                &sender.nick,
                Numeric::ErrNoSuchNick,
                &[target.as_str()],
            )),
        }
        None
    }
}
