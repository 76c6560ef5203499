//! One-to-one call signaling: invitations, answers and the answer timeout.
//! Media never passes through the server; the room id is all peers need.

pub mod calls;
pub mod signaling;
