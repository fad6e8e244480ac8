pub mod claim;
pub mod record;
pub mod storage;
pub mod time;

// The processor only ever touches two things:
// - the raw message, an immutable blob deposited by the inbound MTA (object store)
// - one metadata record per logical message, written conditionally (metadata table)
