pub mod batch_consumer;
pub mod health;
pub mod producer;
pub mod rbmq;
pub mod retry_consumer;
pub mod retry_policy;
pub mod topology;
