use crate::operator::Address;
use crate::registry::ActorRegistry;
use crate::ActorError;
use dataflow_log::ActorId;
use std::collections::HashMap;

/// `ask_upstream_for_help`, shared by both the non-blocking and
/// blocking actor specialisations: for each parent, call
/// `update_target_ip_and_help_recover` with this actor's own restored
/// `state_tag[parent]` as the cursor. A parent that cannot be reached
/// is a `RecoveryPeerError` -- fatal locally, since without the
/// parent's replayed history this actor cannot reproduce its pre-crash
/// state deterministically.
pub(crate) async fn ask_upstream_for_help(
    self_id: ActorId,
    registry: &ActorRegistry,
    parents: &[ActorId],
    state_tag: &HashMap<ActorId, u64>,
    address: &Address,
) -> Result<(), ActorError> {
    for &parent in parents {
        let cursor = state_tag.get(&parent).copied().unwrap_or(0);
        let handle = registry.get(parent).ok_or(ActorError::RecoveryPeer(parent))?;
        handle
            .update_target_ip_and_help_recover(self_id.node, self_id.channel, cursor, address.clone())
            .await?;
    }
    Ok(())
}
