//! Event topics and subscription patterns.
//!
//! A topic renders as `address.group.name.kind`, for example `1a2b3c.1.on.direct_ack`
//! or `modem._.get_im_info.ack`. Patterns are structured; [`TopicPattern::parse`]
//! accepts the same dotted form with `*` segments, a trailing `*` on the name for a
//! prefix match, and missing trailing segments meaning "anything".

use crate::core::address::Address;
use crate::core::flags::MessageType;
use crate::error::{ProtocolError, Result};
use std::borrow::Cow;
use std::fmt;

/// Rendered in place of an address for modem-originated frames.
pub const MODEM_SEGMENT: &str = "modem";
/// Rendered in place of a missing group.
pub const NO_GROUP_SEGMENT: &str = "_";

/// What kind of frame produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An Insteon message received from the powerline.
    Insteon(MessageType),
    /// Modem echo accepting a host command.
    Ack,
    /// Modem echo refusing a host command.
    Nak,
    /// Any other modem report.
    Received,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Insteon(kind) => kind.name(),
            EventKind::Ack => "ack",
            EventKind::Nak => "nak",
            EventKind::Received => "received",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ack" => Some(EventKind::Ack),
            "nak" => Some(EventKind::Nak),
            "received" => Some(EventKind::Received),
            other => MessageType::from_name(other).map(EventKind::Insteon),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Concrete topic of a published event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// `None` for frames that originate at the modem.
    pub address: Option<Address>,
    pub group: Option<u8>,
    pub name: &'static str,
    pub kind: EventKind,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => f.write_str(&address.id())?,
            None => f.write_str(MODEM_SEGMENT)?,
        }
        match self.group {
            Some(group) => write!(f, ".{group}")?,
            None => write!(f, ".{NO_GROUP_SEGMENT}")?,
        }
        write!(f, ".{}.{}", self.name, self.kind)
    }
}

/// One pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<T> {
    Any,
    Exactly(T),
}

impl<T: PartialEq> Segment<T> {
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Segment::Any => true,
            Segment::Exactly(expected) => expected == value,
        }
    }
}

/// Name segment, with prefix matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    Any,
    Exactly(Cow<'static, str>),
    Prefix(Cow<'static, str>),
}

impl NamePattern {
    pub fn accepts(&self, name: &str) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Exactly(expected) => expected == name,
            NamePattern::Prefix(prefix) => name.starts_with(prefix.as_ref()),
        }
    }
}

/// Subscription filter over topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    pub address: Segment<Option<Address>>,
    pub group: Segment<Option<u8>>,
    pub name: NamePattern,
    pub kind: Segment<EventKind>,
}

impl TopicPattern {
    /// Matches every topic.
    pub fn any() -> Self {
        Self {
            address: Segment::Any,
            group: Segment::Any,
            name: NamePattern::Any,
            kind: Segment::Any,
        }
    }

    pub fn device(address: Address) -> Self {
        Self::any().with_address(Some(address))
    }

    pub fn modem() -> Self {
        Self::any().with_address(None)
    }

    pub fn with_address(mut self, address: Option<Address>) -> Self {
        self.address = Segment::Exactly(address);
        self
    }

    pub fn with_group(mut self, group: Option<u8>) -> Self {
        self.group = Segment::Exactly(group);
        self
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = NamePattern::Exactly(Cow::Borrowed(name));
        self
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = Segment::Exactly(kind);
        self
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        self.address.accepts(&topic.address)
            && self.group.accepts(&topic.group)
            && self.name.accepts(topic.name)
            && self.kind.accepts(&topic.kind)
    }

    /// Parse the dotted form, e.g. `1a2b3c.*.on`, `modem._.get_im*`, `*.*.*.broadcast`.
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |reason: String| ProtocolError::invalid_field("pattern", reason);
        let segments: Vec<&str> = pattern.split('.').collect();
        if segments.len() > 4 {
            return Err(invalid(format!("too many segments in '{pattern}'")));
        }

        let mut parsed = Self::any();
        for (index, segment) in segments.into_iter().enumerate() {
            if segment == "*" {
                continue;
            }
            match index {
                0 if segment == MODEM_SEGMENT => parsed.address = Segment::Exactly(None),
                0 => {
                    let address = segment
                        .parse::<Address>()
                        .map_err(|_| invalid(format!("bad address '{segment}'")))?;
                    parsed.address = Segment::Exactly(Some(address));
                }
                1 if segment == NO_GROUP_SEGMENT => parsed.group = Segment::Exactly(None),
                1 => {
                    let group = segment
                        .parse::<u8>()
                        .map_err(|_| invalid(format!("bad group '{segment}'")))?;
                    parsed.group = Segment::Exactly(Some(group));
                }
                2 => {
                    parsed.name = match segment.strip_suffix('*') {
                        Some(prefix) => NamePattern::Prefix(Cow::Owned(prefix.to_string())),
                        None => NamePattern::Exactly(Cow::Owned(segment.to_string())),
                    };
                }
                _ => {
                    let kind = EventKind::from_name(segment)
                        .ok_or_else(|| invalid(format!("bad kind '{segment}'")))?;
                    parsed.kind = Segment::Exactly(kind);
                }
            }
        }
        Ok(parsed)
    }
}

impl From<&Topic> for TopicPattern {
    fn from(topic: &Topic) -> Self {
        Self {
            address: Segment::Exactly(topic.address),
            group: Segment::Exactly(topic.group),
            name: NamePattern::Exactly(Cow::Borrowed(topic.name)),
            kind: Segment::Exactly(topic.kind),
        }
    }
}

impl std::str::FromStr for TopicPattern {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> Topic {
        Topic {
            address: Some(Address::new([0x1a, 0x2b, 0x3c])),
            group: Some(1),
            name: "on",
            kind: EventKind::Insteon(MessageType::DirectAck),
        }
    }

    #[test]
    fn test_topic_rendering() {
        assert_eq!(topic().to_string(), "1a2b3c.1.on.direct_ack");
        let modem = Topic {
            address: None,
            group: None,
            name: "get_im_info",
            kind: EventKind::Ack,
        };
        assert_eq!(modem.to_string(), "modem._.get_im_info.ack");
    }

    #[test]
    fn test_parse_exact_and_wildcards() {
        let exact = TopicPattern::parse("1a2b3c.1.on.direct_ack").unwrap();
        assert!(exact.matches(&topic()));
        assert_eq!(exact, TopicPattern::from(&topic()));

        assert!(TopicPattern::parse("1a2b3c").unwrap().matches(&topic()));
        assert!(TopicPattern::parse("*.*.o*").unwrap().matches(&topic()));
        assert!(!TopicPattern::parse("*.2").unwrap().matches(&topic()));
        assert!(!TopicPattern::parse("modem").unwrap().matches(&topic()));
        assert!(!TopicPattern::parse("*.*.*.direct_nak").unwrap().matches(&topic()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TopicPattern::parse("zz.1").is_err());
        assert!(TopicPattern::parse("1a2b3c.300").is_err());
        assert!(TopicPattern::parse("*.*.*.sideways").is_err());
        assert!(TopicPattern::parse("a.b.c.d.e").is_err());
    }
}
