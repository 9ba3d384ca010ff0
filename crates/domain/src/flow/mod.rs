pub mod aggregate;
pub mod deduper;
pub mod record;
pub mod wire;
