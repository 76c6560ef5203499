pub mod delivery;
pub mod messages;
pub mod presence;
pub mod reactions;
pub mod typing;
