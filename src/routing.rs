//! Maps an inbound chat to its forwarding destinations.
//!
//! `chat_id_receive` is a `|`-separated list of source chats and
//! `chat_id_send` a `|`-separated list of `,`-separated destination groups.
//! Group `i` receives everything sent from source `i`. An empty
//! `chat_id_receive` makes group 0 the destination for every chat.

use crate::error::{RelayError, Result};

const GROUP_SEPARATOR: char = '|';
const DESTINATION_SEPARATOR: char = ',';

/// Position of `source` in the receive list, or `None` when it isn't listed.
pub fn match_index(source: &str, receive: &str) -> Option<usize> {
    if receive.is_empty() {
        return Some(0);
    }
    receive.split(GROUP_SEPARATOR).position(|id| id == source)
}

/// Resolve the destinations for `source`.
///
/// An unlisted source yields an empty list. A listed source without a
/// matching send group (the two settings have different lengths) is an
/// error so the caller can log the misconfiguration.
pub fn resolve(source: &str, receive: &str, send: &str) -> Result<Vec<String>> {
    let Some(index) = match_index(source, receive) else {
        return Ok(Vec::new());
    };

    let groups: Vec<&str> = send.split(GROUP_SEPARATOR).collect();
    let group = groups.get(index).ok_or(RelayError::GroupOutOfRange {
        index,
        groups: groups.len(),
    })?;

    Ok(group
        .split(DESTINATION_SEPARATOR)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect())
}

/// Like [`resolve`], but a missing send group simply means nowhere to forward.
#[cfg(test)]
pub fn route(source: &str, receive: &str, send: &str) -> Vec<String> {
    resolve(source, receive, send).unwrap_or_default()
}
