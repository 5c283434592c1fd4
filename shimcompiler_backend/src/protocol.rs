//! The single-line schedule control message.
//!
//! A schedule is sent by the host as one line of `|`-separated fields:
//!
//! ```text
//! c<channel_count>|b<block_count>|l<length_0>|...|l<length_N-1>|r<repeat_0>|...|r<repeat_N-1>
//! ```
//!
//! Every field is a single lowercase tag followed by decimal digits. Tags must appear in exactly
//! this order with exactly `block_count` lengths and repeats. Surrounding whitespace (including
//! the line terminator) and a single trailing `|` are accepted, anything else is rejected with the
//! 0-based position of the offending field.
//!
//! Parsing never touches the active schedule: it produces a [`ScheduleConfig`] which is then
//! applied with [`ScheduleModel::apply`](crate::schedule::ScheduleModel::apply).
//!
//! ```
//! use shimcompiler_backend::protocol::ScheduleConfig;
//!
//! let config: ScheduleConfig = "c2|b2|l4|l3|r2|r1".parse().unwrap();
//! assert_eq!(config.channel_count(), 2);
//! assert_eq!(config.lengths(), vec![4, 3]);
//! assert_eq!(config.repeat_counts(), vec![2, 1]);
//! assert_eq!(config.to_control_string(), "c2|b2|l4|l3|r2|r1");
//! ```

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ConfigurationError;
use crate::schedule::Block;

const FIELD_PATTERN: &str = r"^([a-z])(\d+)$";

fn field_regex() -> &'static Regex {
    static FIELD: OnceLock<Regex> = OnceLock::new();
    FIELD.get_or_init(|| Regex::new(FIELD_PATTERN).expect("field pattern is a valid regex"))
}

/// A parsed, not yet applied, schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleConfig {
    channel_count: usize,
    blocks: Vec<Block>,
}

impl ScheduleConfig {
    pub fn new(channel_count: usize, blocks: Vec<Block>) -> Self {
        Self {
            channel_count,
            blocks,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.length).collect()
    }

    pub fn repeat_counts(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.repeat_count).collect()
    }

    /// Canonical control message for this schedule.
    pub fn to_control_string(&self) -> String {
        let mut fields = vec![
            format!("c{}", self.channel_count),
            format!("b{}", self.blocks.len()),
        ];
        fields.extend(self.blocks.iter().map(|b| format!("l{}", b.length)));
        fields.extend(self.blocks.iter().map(|b| format!("r{}", b.repeat_count)));
        fields.join("|")
    }
}

impl FromStr for ScheduleConfig {
    type Err = ConfigurationError;

    fn from_str(msg: &str) -> Result<Self, Self::Err> {
        parse_control_message(msg)
    }
}

/// Cursor over the fields of one message.
struct Fields<'a> {
    fields: Vec<&'a str>,
    position: usize,
}

impl<'a> Fields<'a> {
    fn next_tagged(&mut self, expected: char) -> Result<usize, ConfigurationError> {
        let position = self.position;
        let field = *self
            .fields
            .get(position)
            .ok_or(ConfigurationError::MissingField { position, expected })?;
        self.position += 1;

        let Some(caps) = field_regex().captures(field) else {
            // Right tag, bad digits is reported as a number problem
            return Err(if field.starts_with(expected) {
                ConfigurationError::InvalidInteger {
                    position,
                    token: field.to_string(),
                }
            } else {
                ConfigurationError::UnexpectedToken {
                    position,
                    expected,
                    found: field.to_string(),
                }
            });
        };
        if !caps[1].starts_with(expected) {
            return Err(ConfigurationError::UnexpectedToken {
                position,
                expected,
                found: field.to_string(),
            });
        }
        caps[2]
            .parse::<usize>()
            .map_err(|_| ConfigurationError::InvalidInteger {
                position,
                token: field.to_string(),
            })
    }

    fn finish(&self) -> Result<(), ConfigurationError> {
        match self.fields.get(self.position) {
            Some(found) => Err(ConfigurationError::TrailingField {
                position: self.position,
                found: found.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Parses a control message into a [`ScheduleConfig`].
///
/// Only the syntax is checked here. Semantic limits (block and channel counts, zero lengths,
/// capacity) are enforced when the config is applied to a schedule.
pub fn parse_control_message(msg: &str) -> Result<ScheduleConfig, ConfigurationError> {
    let msg = msg.trim();
    if msg.is_empty() {
        return Err(ConfigurationError::EmptyMessage);
    }
    let body = msg.strip_suffix('|').unwrap_or(msg);
    let mut fields = Fields {
        fields: body.split('|').collect(),
        position: 0,
    };

    let channel_count = fields.next_tagged('c')?;
    let block_count = fields.next_tagged('b')?;
    let lengths = (0..block_count)
        .map(|_| fields.next_tagged('l'))
        .collect::<Result<Vec<_>, _>>()?;
    let repeats = (0..block_count)
        .map(|_| fields.next_tagged('r'))
        .collect::<Result<Vec<_>, _>>()?;
    fields.finish()?;

    let blocks = lengths
        .into_iter()
        .zip(repeats)
        .map(|(length, repeat_count)| Block::new(length, repeat_count))
        .collect();
    Ok(ScheduleConfig::new(channel_count, blocks))
}
