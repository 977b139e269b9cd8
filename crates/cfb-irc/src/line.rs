//! IRC line parsing (RFC 1459 message shape).

use cfb_core::relay::types::ChatEvent;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrcLine {
    pub prefix: Option<String>,
    pub command: String,
    /// Middle params followed by the trailing param, if any.
    pub params: Vec<String>,
}

impl IrcLine {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut rest = raw.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (p, r) = stripped.split_once(' ')?;
            rest = r;
            Some(p.to_string())
        } else {
            None
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((h, t)) => (h, Some(t)),
            None => (rest, None),
        };

        let mut parts = head.split(' ').filter(|s| !s.is_empty());
        let command = parts.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(t) = trailing {
            params.push(t.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nick part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split('!').next().unwrap_or(p))
    }

    /// Relay event for this line, if it is one the relay cares about.
    /// Only our own JOINs start channel tracking.
    pub fn into_event(self, own_nick: &str) -> Option<ChatEvent> {
        match self.command.as_str() {
            "JOIN" => {
                if !self.nick()?.eq_ignore_ascii_case(own_nick) {
                    return None;
                }
                let channel = self.params.into_iter().next()?;
                Some(ChatEvent::Joined { channel })
            }
            "PRIVMSG" => {
                let sender = self.nick().map(str::to_string);
                let mut params = self.params.into_iter();
                let channel = params.next()?;
                let text = params.next().unwrap_or_default();
                Some(ChatEvent::Message {
                    channel,
                    sender,
                    text,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_command_and_trailing() {
        let line = IrcLine::parse(":alice!a@host PRIVMSG #test :hello there\r\n").unwrap();
        assert_eq!(line.prefix.as_deref(), Some("alice!a@host"));
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#test", "hello there"]);
        assert_eq!(line.nick(), Some("alice"));
    }

    #[test]
    fn parses_server_ping_without_prefix() {
        let line = IrcLine::parse("PING :irc.example.net").unwrap();
        assert!(line.prefix.is_none());
        assert_eq!(line.command, "PING");
        assert_eq!(line.params, vec!["irc.example.net"]);
    }

    #[test]
    fn numeric_reply_keeps_middle_params() {
        let line = IrcLine::parse(":srv 001 ircbridge :Welcome to the network").unwrap();
        assert_eq!(line.command, "001");
        assert_eq!(line.params, vec!["ircbridge", "Welcome to the network"]);
    }

    #[test]
    fn empty_line_is_ignored() {
        assert!(IrcLine::parse("\r\n").is_none());
    }

    #[test]
    fn privmsg_becomes_message_event() {
        let ev = IrcLine::parse(":bob!b@h PRIVMSG #test :a")
            .unwrap()
            .into_event("ircbridge");
        assert_eq!(
            ev,
            Some(ChatEvent::Message {
                channel: "#test".to_string(),
                sender: Some("bob".to_string()),
                text: "a".to_string(),
            })
        );
    }

    #[test]
    fn only_own_join_is_tracked() {
        let own = IrcLine::parse(":IRCBridge!u@h JOIN #ollama")
            .unwrap()
            .into_event("ircbridge");
        assert_eq!(
            own,
            Some(ChatEvent::Joined {
                channel: "#ollama".to_string()
            })
        );

        let other = IrcLine::parse(":carol!c@h JOIN :#ollama")
            .unwrap()
            .into_event("ircbridge");
        assert!(other.is_none());
    }
}
