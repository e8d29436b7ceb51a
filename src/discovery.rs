//! Live block-catalog discovery.
//!
//! The protocol has no "list block types" command. What it does have: an
//! invalid attribute query is answered with an error naming the handling
//! interface, e.g. `-ERR Ducker GateInterface::Attributes`. Probing every
//! session alias with a bogus `get BLOCKTYPE` therefore yields each block's
//! type name from the error tail.

use std::collections::BTreeMap;

use tracing::{debug, info};
use ttp_protocol::{block_type_from_error, get_command};

use crate::block_map::BlockEntry;
use crate::session::command::{CommandError, CommandQueue};

/// The session alias for the device itself; it is not a DSP block.
pub(crate) const DEVICE_ALIAS: &str = "device";

/// Probe every alias and build the initial block map. Entries carry no
/// attribute helper yet — each block queries its own attributes when it is
/// constructed.
pub(crate) async fn discover_blocks(
    queue: &CommandQueue,
    aliases: &[String],
) -> Result<BTreeMap<String, BlockEntry>, CommandError> {
    info!("starting block map discovery");
    let mut map = BTreeMap::new();
    for (i, alias) in aliases.iter().enumerate() {
        if alias == DEVICE_ALIAS {
            continue;
        }

        let response = queue.submit(get_command(alias, "BLOCKTYPE", None)).await?;
        let Some(message) = response.error_message() else {
            // An +OK to a bogus attribute query: nothing to learn here.
            debug!(%alias, "block type probe not answered with an error, skipped");
            continue;
        };
        let Some(block_type) = block_type_from_error(message) else {
            // No attribute interface in the error tail; alias is not a
            // controllable block.
            debug!(%alias, message, "no attribute interface in probe reply, skipped");
            continue;
        };

        debug!(
            %alias,
            %block_type,
            index = i + 1,
            total = aliases.len(),
            "block discovered"
        );
        map.insert(
            alias.clone(),
            BlockEntry {
                block_type,
                attributes: None,
            },
        );
    }
    info!(count = map.len(), "block map discovery finished");
    Ok(map)
}
