//! Builds presence snapshots from the directory and registry.

use huddle_core::{PresenceEntry, PresenceSnapshot, SessionId};

use super::directory::SessionDirectory;
use super::registry::ConnectionRegistry;

/// Current presence of a session, or `None` if it has no members.
///
/// Members missing from the registry are skipped; the actor removes a
/// connection from both maps in the same command so this only matters
/// for callers holding inconsistent state in tests.
pub fn snapshot(
    directory: &SessionDirectory,
    registry: &ConnectionRegistry,
    session_id: &SessionId,
) -> Option<PresenceSnapshot> {
    let members = directory.members(session_id);
    if members.is_empty() {
        return None;
    }

    let entries = members.iter().filter_map(|connection_id| {
        registry.get(connection_id).map(|entry| {
            PresenceEntry::new(
                entry.user_id.clone(),
                entry.device_type,
                connection_id.clone(),
            )
        })
    });

    Some(PresenceSnapshot::compute(session_id.clone(), entries))
}
