//! Command topic and property bag parsing
//!
//! Command topics delivered on the command subscription look like
//!
//! ```text
//! command///req/<request-id>/<command-name>[/<extra>]*[?<property-bag>]
//! command///q/<request-id>/<command-name>[/<extra>]*[?<property-bag>]
//! ```
//!
//! An empty `<request-id>` slot marks a one-way command. The parser is a
//! tokenizer over `/`-separated segments plus the `?`-separated suffix; it
//! never fails. A topic that does not fit the grammar yields an empty
//! [`Command`] so a consumer still sees that something arrived.

use super::command::{Command, PropertyBag};
use tracing::debug;

const REQUEST_MARKERS: [&str; 2] = ["req", "q"];

/// Parse a raw command topic into a [`Command`] without payload
pub fn parse_command_topic(topic: &str) -> Command {
    // Everything from the first '?' on is the property bag
    let (path, bag) = match topic.find('?') {
        Some(index) => (&topic[..index], Some(&topic[index..])),
        None => (topic, None),
    };

    let Some(parts) = CommandPath::tokenize(path) else {
        debug!(topic, "Topic does not match the command grammar");
        return Command::default();
    };

    let command = Command {
        command_name: parts.command_name.map(str::to_string),
        request_id: parts.request_id.map(str::to_string),
        property_bag: bag.map(parse_property_bag).unwrap_or_default(),
        ..Default::default()
    };

    debug!(
        topic,
        command = command.name(),
        request_id = ?command.request_id,
        properties = command.property_bag.len(),
        "Parsed command topic"
    );
    command
}

/// Parse a `?k=v&k2=v2` suffix into a property bag
///
/// Keys and values must be non-empty and alphanumeric; anything else is
/// skipped. A key seen twice keeps its last value.
pub fn parse_property_bag(bag: &str) -> PropertyBag {
    let mut properties = PropertyBag::new();
    let Some(entries) = bag.strip_prefix('?') else {
        return properties;
    };

    for entry in entries.split('&').filter(|entry| !entry.is_empty()) {
        match entry.split_once('=') {
            Some((key, value)) if is_bag_token(key) && is_bag_token(value) => {
                debug!(key, value, "PropertyBag entry");
                properties.insert(key.to_string(), value.to_string());
            }
            _ => debug!(entry, "Skipping malformed property bag entry"),
        }
    }

    properties
}

/// Path portion of a command topic split into its grammar slots
#[derive(Debug, PartialEq)]
struct CommandPath<'a> {
    request_id: Option<&'a str>,
    command_name: Option<&'a str>,
}

impl<'a> CommandPath<'a> {
    fn tokenize(path: &'a str) -> Option<Self> {
        let mut segments = path.split('/');

        if !segments.next()?.eq_ignore_ascii_case(super::topics::COMMAND_ENDPOINT) {
            return None;
        }
        // tenant and device slots are empty on command topics sent to the device
        if !segments.next()?.is_empty() || !segments.next()?.is_empty() {
            return None;
        }
        let marker = segments.next()?;
        if !REQUEST_MARKERS
            .iter()
            .any(|known| marker.eq_ignore_ascii_case(known))
        {
            return None;
        }

        let request_slot = segments.next()?;
        let mut remaining = segments.peekable();
        // the request-id slot must be closed by a '/'
        remaining.peek()?;

        let command_name = remaining
            .find(|segment| !segment.is_empty())
            .map(leading_word)
            .filter(|name| !name.is_empty());

        Some(Self {
            request_id: Some(request_slot).filter(|id| !id.is_empty()),
            command_name,
        })
    }
}

fn leading_word(segment: &str) -> &str {
    let end = segment
        .char_indices()
        .find(|(_, c)| !is_word_char(*c))
        .map_or(segment.len(), |(index, _)| index);
    &segment[..end]
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_bag_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(char::is_alphanumeric)
}
