//! Command-topic protocol for Hono devices
//!
//! Value types, the topic grammar with its authenticated/unauthenticated
//! forms, and the inbound command topic parser.

pub mod command;
pub mod parser;
pub mod topics;

pub use command::{Command, PropertyBag, PublishReason, SendResult};
pub use parser::{parse_command_topic, parse_property_bag};
pub use topics::{encode_response_topic, AuthMode, TopicTable};
