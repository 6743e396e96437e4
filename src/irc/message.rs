/// IRC message parsing and serialization.
///
/// Implements the RFC 2812 line shape:
///   [`:`prefix SPACE] command *(SPACE middle) [SPACE `:` trailing]
///
/// Middle parameters can never contain a space; anything that needs one
/// goes in the trailing parameter. Messages are values: the `with_*`
/// builders return a fresh copy so a template can be reused for many
/// recipients without being mutated.

/// A parsed IRC message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Optional prefix (server name or `nick!user@host`).
    pub prefix: Option<String>,
    /// The command (e.g. `PRIVMSG`, `001`, `NICK`).
    pub command: String,
    /// Middle (positional) parameters, none of which contain a space.
    pub params: Vec<String>,
    /// The trailing parameter, if the line carried one.
    pub trailing: Option<String>,
}

/// Errors that can occur during message parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

/// Errors that make a message unrepresentable on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("message has no command")]
    EmptyCommand,
    #[error("command {0:?} is not a single token")]
    MalformedCommand(String),
    #[error("prefix contains a space")]
    SpaceInPrefix,
    #[error("middle parameter {index} contains a space")]
    SpaceInParam { index: usize },
    #[error("middle parameter {index} is empty")]
    EmptyParam { index: usize },
    #[error("middle parameter {index} starts with ':'")]
    LeadingColon { index: usize },
    #[error("message contains CR, LF or NUL")]
    LineBreak,
}

/// Characters that would end or corrupt the line they appear in.
fn has_line_break(s: &str) -> bool {
    s.contains(['\r', '\n', '\0'])
}

impl Message {
    /// A bare message with only a command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Parse a single IRC message from a line (the `\r\n` is optional).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match input.strip_prefix(':') {
            // Prefix runs until the first space.
            Some(stripped) => match stripped.split_once(' ') {
                Some((prefix, rest)) => (Some(prefix.to_owned()), rest),
                None => return Err(ParseError::MissingCommand),
            },
            None => (None, input),
        };

        let rest = rest.trim_start_matches(' ');
        let (command, mut remaining) = rest.split_once(' ').unwrap_or((rest, ""));

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        let mut trailing = None;

        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(rest) = remaining.strip_prefix(':') {
                // Trailing parameter: everything after the colon, spaces included.
                trailing = Some(rest.to_owned());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, rest)) => {
                    params.push(param.to_owned());
                    remaining = rest;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            params,
            trailing,
        })
    }

    /// Serialize to a CRLF-terminated wire line.
    ///
    /// Fails without producing output when any field could not be read back
    /// as written: an empty or multi-token command, a middle parameter that
    /// is empty, contains a space, or starts with `:`, or a CR, LF or NUL
    /// anywhere. An empty trailing parameter is omitted.
    pub fn encode(&self) -> Result<String, EncodeError> {
        if self.command.is_empty() {
            return Err(EncodeError::EmptyCommand);
        }
        if self.command.contains(' ') || self.command.starts_with(':') {
            return Err(EncodeError::MalformedCommand(self.command.clone()));
        }

        let prefix = self.prefix.as_deref().filter(|p| !p.is_empty());
        let trailing = self.trailing.as_deref().filter(|t| !t.is_empty());

        let fields = prefix
            .into_iter()
            .chain([self.command.as_str()])
            .chain(self.params.iter().map(String::as_str))
            .chain(trailing);
        for field in fields {
            if has_line_break(field) {
                return Err(EncodeError::LineBreak);
            }
        }

        let mut out = String::new();

        if let Some(prefix) = prefix {
            if prefix.contains(' ') {
                return Err(EncodeError::SpaceInPrefix);
            }
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        for (index, param) in self.params.iter().enumerate() {
            if param.is_empty() {
                return Err(EncodeError::EmptyParam { index });
            }
            if param.contains(' ') {
                return Err(EncodeError::SpaceInParam { index });
            }
            if param.starts_with(':') {
                return Err(EncodeError::LeadingColon { index });
            }
            out.push(' ');
            out.push_str(param);
        }

        if let Some(trailing) = trailing {
            out.push_str(" :");
            out.push_str(trailing);
        }

        out.push_str("\r\n");
        Ok(out)
    }

    /// Returns the trailing parameter, or the last positional parameter when
    /// the client sent it without a `:` and there are more than `min_index`
    /// parameters. Empty otherwise.
    pub fn lax_trailing(&self, min_index: usize) -> &str {
        if let Some(trailing) = self.trailing.as_deref().filter(|t| !t.is_empty()) {
            return trailing;
        }
        if self.params.len() <= min_index {
            return "";
        }
        self.params.last().map(String::as_str).unwrap_or("")
    }

    /// The command, ASCII-uppercased for dispatch.
    pub fn verb(&self) -> String {
        self.command.to_ascii_uppercase()
    }

    /// A copy of this message with the given middle parameters.
    pub fn with_params<I, S>(&self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    /// A copy of this message with the given trailing parameter.
    pub fn with_trailing(&self, trailing: impl Into<String>) -> Self {
        Self {
            trailing: Some(trailing.into()),
            ..self.clone()
        }
    }

    /// A copy of this message with the given prefix.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    // ── Parsing ──────────────────────────────────────────────────

    #[test]
    fn parse_simple_command() {
        let msg = Message::parse("QUIT").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "QUIT");
        assert!(msg.params.is_empty());
        assert_eq!(msg.trailing, None);
    }

    #[test]
    fn parse_with_prefix_and_trailing() {
        let msg = Message::parse(":carol!c@host PRIVMSG #cove :hey there friends").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("carol!c@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#cove"]);
        assert_eq!(msg.trailing.as_deref(), Some("hey there friends"));
    }

    #[test]
    fn parse_user_command() {
        let msg = Message::parse("USER alice 0 * :Alice A").unwrap();
        assert_eq!(msg.params, vec!["alice", "0", "*"]);
        assert_eq!(msg.trailing.as_deref(), Some("Alice A"));
    }

    #[test]
    fn parse_trailing_keeps_inner_colons() {
        let msg = Message::parse("PRIVMSG #cove ::) see: this").unwrap();
        assert_eq!(msg.trailing.as_deref(), Some(":) see: this"));
    }

    #[test]
    fn parse_tolerates_repeated_spaces_and_crlf() {
        let msg = Message::parse("MODE  #cove   +o  bob\r\n").unwrap();
        assert_eq!(msg.command, "MODE");
        assert_eq!(msg.params, vec!["#cove", "+o", "bob"]);
    }

    #[test]
    fn parse_empty_trailing() {
        let msg = Message::parse("TOPIC #cove :").unwrap();
        assert_eq!(msg.params, vec!["#cove"]);
        assert_eq!(msg.trailing.as_deref(), Some(""));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(Message::parse(":prefix_only"), Err(ParseError::MissingCommand));
    }

    // ── Encoding ─────────────────────────────────────────────────

    #[test]
    fn encode_prefix_params_and_trailing() {
        let msg = Message::new("PRIVMSG")
            .with_prefix("server.example")
            .with_params(["#chan"])
            .with_trailing("hello world");
        assert_eq!(
            msg.encode().unwrap(),
            ":server.example PRIVMSG #chan :hello world\r\n"
        );
    }

    #[test]
    fn encode_omits_empty_trailing() {
        let msg = Message::new("JOIN").with_params(["#chan"]).with_trailing("");
        assert_eq!(msg.encode().unwrap(), "JOIN #chan\r\n");
    }

    #[test]
    fn encode_rejects_empty_command() {
        let msg = Message::default().with_params(["x"]);
        assert_eq!(msg.encode(), Err(EncodeError::EmptyCommand));
    }

    #[test]
    fn encode_rejects_space_in_middle_param() {
        let msg = Message::new("PRIVMSG").with_params(["#chan", "two words"]);
        assert_eq!(msg.encode(), Err(EncodeError::SpaceInParam { index: 1 }));
    }

    #[test]
    fn encode_rejects_unreadable_params() {
        let colon = Message::new("PRIVMSG").with_params([":)"]);
        assert_eq!(colon.encode(), Err(EncodeError::LeadingColon { index: 0 }));

        let empty = Message::new("PRIVMSG").with_params(["a", ""]);
        assert_eq!(empty.encode(), Err(EncodeError::EmptyParam { index: 1 }));

        let command = Message::new("PRIV MSG");
        assert!(matches!(command.encode(), Err(EncodeError::MalformedCommand(_))));

        let prefix = Message::new("PING").with_prefix("two words");
        assert_eq!(prefix.encode(), Err(EncodeError::SpaceInPrefix));
    }

    #[test]
    fn encode_rejects_embedded_line_breaks() {
        let relayed = Message::new("PRIVMSG")
            .with_prefix("alice!a@h")
            .with_params(["bob"])
            .with_trailing("hi\r:evil.server 001 bob :pwned");
        assert_eq!(relayed.encode(), Err(EncodeError::LineBreak));

        let nul = Message::new("NOTICE").with_params(["bob\0"]);
        assert_eq!(nul.encode(), Err(EncodeError::LineBreak));

        let lf = Message::new("PING").with_prefix("srv\n");
        assert_eq!(lf.encode(), Err(EncodeError::LineBreak));
    }

    fn random_token(rng: &mut impl Rng, alphabet: &[u8], len: std::ops::RangeInclusive<usize>) -> String {
        let len = rng.gen_range(len);
        (0..len)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }

    #[test]
    fn decode_reverses_encode() {
        const MIDDLE: &[u8] = b"abcXYZ019#&!@*.-_[]:";
        const TRAILING: &[u8] = b"abc XYZ 019 :#!@  ";
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let mut msg = Message::new(random_token(&mut rng, b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789", 1..=8));
            if rng.gen_bool(0.5) {
                msg = msg.with_prefix(random_token(&mut rng, MIDDLE, 1..=20));
            }
            let params: Vec<String> = (0..rng.gen_range(0..=5))
                .map(|_| {
                    // A leading ':' would turn the param into a trailing.
                    let first = random_token(&mut rng, b"abcXYZ019#&", 1..=1);
                    first + &random_token(&mut rng, MIDDLE, 0..=10)
                })
                .collect();
            msg = msg.with_params(params);
            if rng.gen_bool(0.5) {
                msg = msg.with_trailing(random_token(&mut rng, TRAILING, 1..=30));
            }

            let wire = msg.encode().unwrap();
            assert_eq!(Message::parse(&wire).unwrap(), msg, "wire: {wire:?}");
        }
    }

    // ── Builders ─────────────────────────────────────────────────

    #[test]
    fn builders_leave_template_untouched() {
        let template = Message::new("NOTICE").with_trailing("hi");
        let to_alice = template.with_params(["alice"]);
        let to_bob = template.with_params(["bob"]).with_prefix("srv");

        assert!(template.params.is_empty());
        assert_eq!(template.prefix, None);
        assert_eq!(to_alice.params, vec!["alice"]);
        assert_eq!(to_bob.params, vec!["bob"]);
        assert_eq!(to_alice.prefix, None);
    }

    // ── lax_trailing ─────────────────────────────────────────────

    #[test]
    fn lax_trailing_prefers_trailing() {
        let msg = Message::parse("USER a 0 * :Real Name").unwrap();
        assert_eq!(msg.lax_trailing(3), "Real Name");
    }

    #[test]
    fn lax_trailing_falls_back_to_last_param() {
        let msg = Message::parse("USER a 0 * RealName").unwrap();
        assert_eq!(msg.lax_trailing(3), "RealName");
    }

    #[test]
    fn lax_trailing_empty_when_too_few_params() {
        let msg = Message::parse("USER a 0 *").unwrap();
        assert_eq!(msg.lax_trailing(3), "");
    }
}
