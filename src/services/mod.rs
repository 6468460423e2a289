pub mod delivery;
pub mod ingest;
pub mod strategy;
