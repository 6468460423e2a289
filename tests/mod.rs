mod common;

mod ingest_tests;
mod rbmq_tests;
mod shutdown_tests;
