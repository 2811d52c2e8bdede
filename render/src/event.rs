//! Resource change events.
//!
//! The resource system reports modified resources by UUID; a backend that
//! has the UUID bound reloads it in place, preserving handle identity so
//! live command references stay valid.

use crate::backend::Backend;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResourceEvent {
    Create(Uuid),
    Modify(Uuid),
    Delete(Uuid),
}

/// Handles a resource event against one backend. Returns true when the event
/// named a resource this backend had bound and the reload succeeded.
pub fn render_event_handle_resource(backend: &Arc<Backend>, event: ResourceEvent) -> bool {
    let uuid = match event {
        ResourceEvent::Modify(uuid) => uuid,
        _ => return false,
    };

    if backend.shader_lookup(uuid).is_some() && backend.shader_reload(uuid) {
        return true;
    }
    if backend.program_lookup(uuid).is_some() && backend.program_reload(uuid) {
        return true;
    }
    false
}
