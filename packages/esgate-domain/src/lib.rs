pub mod blocklist;
pub mod extract;
pub mod history;
pub mod intent;
pub mod limits;
pub mod threat;
