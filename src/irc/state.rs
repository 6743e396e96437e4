/// Server state: the user and channel directory every connection shares.
///
/// The registry is plain data with no interior locking. Concurrent access
/// goes through [`SharedRegistry`], a single slot that hands the registry
/// to exactly one holder at a time.
///
/// Users and channels refer to each other by id, never by reference, and
/// the two membership sets (`User::channels`, `Channel::members`) are kept
/// symmetric by every mutating operation here.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, Span};

use super::channel_log::{ChannelLogEntry, PendingWrite};
use super::config::Config;
use super::message::Message;

/// Maximum nickname length, in characters.
pub const MAX_NICK_LEN: usize = 9;

/// Where a user's outbound messages go. Sending never blocks.
pub type Sink = mpsc::UnboundedSender<Message>;

/// Normalize a string for case-insensitive IRC comparison (CASEMAPPING=ascii).
pub fn irc_lower(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Whether `nick` can travel as a middle parameter: non-empty, no leading
/// `:`, no whitespace or control characters.
fn is_wire_safe_nick(nick: &str) -> bool {
    !nick.is_empty()
        && !nick.starts_with(':')
        && !nick.chars().any(|c| c.is_whitespace() || c.is_control())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

/// A user holding a nickname, registered or not.
#[derive(Debug)]
pub struct User {
    id: UserId,
    /// Nickname as the client typed it.
    pub nick: String,
    /// Username from `USER`, set when registration completes.
    pub user: Option<String>,
    /// Real name from `USER`.
    pub realname: Option<String>,
    channels: HashSet<ChannelId>,
    sink: Option<Sink>,
}

impl User {
    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.user.is_some()
    }

    /// Channels this user has joined.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().copied()
    }

    /// `nick!user@host` source for messages from this user.
    pub fn prefix(&self, host: &str) -> String {
        let user = self.user.as_deref().unwrap_or(&self.nick);
        format!("{}!{user}@{host}", self.nick)
    }

    /// Attach the connection that receives this user's output.
    pub fn attach(&mut self, sink: Sink) {
        self.sink = Some(sink);
    }

    /// Queue a message for this user. Dropped if no connection is attached
    /// or the connection has gone away.
    pub fn send(&self, msg: Message) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(msg);
        }
    }
}

/// A channel with at least one member.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    /// Channel name as first joined.
    pub name: String,
    key: String,
    members: HashSet<UserId>,
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Lowercased name, used for lookup and the log file name.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn members(&self) -> impl Iterator<Item = UserId> + '_ {
        self.members.iter().copied()
    }

    pub fn has_member(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// The directory of users and channels plus the frozen config.
#[derive(Debug)]
pub struct Registry {
    config: Arc<Config>,
    span: Span,
    next_id: u64,
    users: HashMap<UserId, User>,
    nicks: HashMap<String, UserId>,
    channels: HashMap<ChannelId, Channel>,
    channel_names: HashMap<String, ChannelId>,
}

impl Registry {
    /// Create an empty registry. Its log events are parented to `span`.
    pub fn new(config: Config, span: Span) -> Self {
        Self {
            config: Arc::new(config),
            span,
            next_id: 0,
            users: HashMap::new(),
            nicks: HashMap::new(),
            channels: HashMap::new(),
            channel_names: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Visit every channel. The callback must not try to acquire the
    /// [`SharedRegistry`] slot again; the caller already holds it.
    pub fn for_channels(&self, mut visit: impl FnMut(&Channel)) {
        for channel in self.channels.values() {
            visit(channel);
        }
    }

    /// Visit every user. Same caller obligation as [`Self::for_channels`].
    pub fn for_users(&self, mut visit: impl FnMut(&User)) {
        for user in self.users.values() {
            visit(user);
        }
    }

    pub fn get_channel(&self, name: &str) -> Option<&Channel> {
        let id = self.channel_names.get(&irc_lower(name))?;
        self.channels.get(id)
    }

    pub fn get_user(&self, nick: &str) -> Option<&User> {
        let id = self.nicks.get(&irc_lower(nick))?;
        self.users.get(id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Reserve `nick`. Fails if it is taken in any case, is longer than
    /// [`MAX_NICK_LEN`] characters, or could not be written back to clients.
    pub fn new_user(&mut self, nick: &str) -> Option<UserId> {
        let key = irc_lower(nick);
        if self.nicks.contains_key(&key) {
            return None;
        }
        if nick.chars().count() > MAX_NICK_LEN || !is_wire_safe_nick(nick) {
            return None;
        }

        debug!(parent: &self.span, nick, "adding new user");

        let id = UserId(self.next_id());
        self.users.insert(
            id,
            User {
                id,
                nick: nick.to_owned(),
                user: None,
                realname: None,
                channels: HashSet::new(),
                sink: None,
            },
        );
        self.nicks.insert(key, id);
        Some(id)
    }

    /// Part `user` from every channel it is in, then forget it.
    pub fn remove_user(&mut self, user: UserId) {
        let Some(joined) = self.users.get(&user).map(|u| u.channels.clone()) else {
            return;
        };

        for channel in joined {
            self.part_channel(channel, user, "QUITing");
        }

        if let Some(removed) = self.users.remove(&user) {
            debug!(parent: &self.span, nick = %removed.nick, "removed user");
            self.nicks.remove(&irc_lower(&removed.nick));
        }
    }

    /// Create an empty channel. Fails if the name is taken in any case or
    /// does not start with `#` or `&`.
    pub fn new_channel(&mut self, name: &str) -> Option<ChannelId> {
        let key = irc_lower(name);
        if self.channel_names.contains_key(&key) {
            return None;
        }
        if !key.starts_with(['#', '&']) {
            return None;
        }

        debug!(parent: &self.span, channel = name, "creating channel");

        let id = ChannelId(self.next_id());
        self.channels.insert(
            id,
            Channel {
                id,
                name: name.to_owned(),
                key: key.clone(),
                members: HashSet::new(),
            },
        );
        self.channel_names.insert(key, id);
        Some(id)
    }

    /// Drop `channel` if nobody is left in it.
    pub fn recycle_channel(&mut self, channel: ChannelId) {
        let Some(ch) = self.channels.get(&channel) else {
            return;
        };
        if !ch.is_empty() {
            return;
        }

        debug!(parent: &self.span, channel = %ch.name, "recycling channel");

        if let Some(removed) = self.channels.remove(&channel) {
            self.channel_names.remove(&removed.key);
        }
    }

    /// Add `user` to `channel`. No permission checks. Returns `false` if the
    /// user was already a member or either id is unknown.
    pub fn join_channel(&mut self, channel: ChannelId, user: UserId) -> bool {
        let (Some(ch), Some(u)) = (self.channels.get_mut(&channel), self.users.get_mut(&user))
        else {
            return false;
        };
        if !ch.members.insert(user) {
            return false;
        }
        u.channels.insert(channel);

        if let (Some(ch), Some(u)) = (self.channels.get(&channel), self.users.get(&user)) {
            debug!(parent: &self.span, nick = %u.nick, channel = %ch.name, "joined channel");
        }
        true
    }

    /// Remove `user` from `channel`, telling everyone still in it (and the
    /// user) with a `PART`. The channel is recycled if it empties.
    pub fn part_channel(&mut self, channel: ChannelId, user: UserId, reason: &str) {
        if let (Some(ch), Some(u)) = (self.channels.get(&channel), self.users.get(&user)) {
            if ch.has_member(user) {
                debug!(parent: &self.span, nick = %u.nick, channel = %ch.name, reason, "parting channel");
                let part = Message::new("PART")
                    .with_prefix(u.prefix(&self.config.name))
                    .with_params([ch.name.as_str()])
                    .with_trailing(reason);
                self.send_to_channel(channel, None, &part);
            }
        }
        self.remove_from_channel(channel, user);
    }

    /// Silently unlink `user` and `channel`, then recycle the channel if it
    /// emptied. Safe when the link does not exist.
    pub fn remove_from_channel(&mut self, channel: ChannelId, user: UserId) {
        if let Some(u) = self.users.get_mut(&user) {
            u.channels.remove(&channel);
        }

        let Some(ch) = self.channels.get_mut(&channel) else {
            return;
        };
        if !ch.members.remove(&user) {
            return;
        }

        self.recycle_channel(channel);
    }

    /// Deliver `msg` to every member of `channel` except `skip`.
    pub fn send_to_channel(&self, channel: ChannelId, skip: Option<UserId>, msg: &Message) {
        let Some(ch) = self.channels.get(&channel) else {
            return;
        };
        for member in ch.members() {
            if Some(member) == skip {
                continue;
            }
            if let Some(u) = self.users.get(&member) {
                u.send(msg.clone());
            }
        }
    }

    /// Record a message for the channel's log file, when logging is enabled.
    ///
    /// The record is stamped now but written by [`PendingWrite::write`],
    /// which callers run after releasing the [`SharedRegistry`] slot so no
    /// disk I/O happens while other connections wait.
    pub fn log_channel_message(
        &self,
        channel: ChannelId,
        nick: &str,
        text: &str,
    ) -> Option<PendingWrite> {
        if !self.config.logs.log_channel_messages {
            return None;
        }
        let ch = self.channels.get(&channel)?;

        let entry = ChannelLogEntry {
            nick: nick.to_owned(),
            message: text.to_owned(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        Some(PendingWrite::new(
            self.span.clone(),
            self.config.logs.path.clone(),
            ch.key().to_owned(),
            entry,
        ))
    }
}

/// The single slot through which connections take turns owning the
/// registry.
///
/// `acquire` waits until the registry is free and hands back a guard; the
/// registry goes back in the slot when the guard drops, on every exit path.
/// Holders must not wait on the network, and must not acquire again while
/// holding the guard (the slot is not reentrant and that would deadlock).
///
/// The config is immutable, so a copy of it is readable without taking a
/// turn.
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    slot: Arc<Mutex<Registry>>,
    config: Arc<Config>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            config: Arc::clone(&registry.config),
            slot: Arc::new(Mutex::new(registry)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn acquire(&self) -> MutexGuard<'_, Registry> {
        self.slot.lock().await
    }
}
