pub mod state;
pub mod downstream;
pub mod ingest;
