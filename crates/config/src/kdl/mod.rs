//! KDL configuration parsing.
//!
//! - `helpers`: Common parsing utility functions
//! - `listener`: Listener and challenge block parsing

mod helpers;
mod listener;

pub use helpers::{get_int_entry, get_string_entry, offset_to_line_col};
pub use listener::{parse_challenge_config, parse_listener_config};

use anyhow::Result;

use crate::Config;

/// Convert a parsed KDL document to Config
///
/// Both blocks are optional; missing blocks use their defaults.
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "listener" => {
                config.listener = parse_listener_config(node)?;
            }
            "challenge" => {
                config.challenge = parse_challenge_config(node)?;
            }
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level configuration block: '{}'\n\
                     Valid blocks are: listener, challenge",
                    other
                ));
            }
        }
    }

    Ok(config)
}
