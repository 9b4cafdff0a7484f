use std::sync::atomic::{AtomicBool, Ordering};

/// The conversation a core instance serves. Closing it tells in-flight work
/// to drop its results instead of writing them back.
#[derive(Debug)]
pub struct Room {
    room_id: String,
    active: AtomicBool,
}

impl Room {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.room_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` if this call closed the room.
    pub fn close(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}
