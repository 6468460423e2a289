use std::time::Duration;

use lapin::{
    Channel,
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tracing::info;

use crate::{
    clients::rbmq::QueueNames,
    error::{QueueError, QueueResult},
    utils::duration_ms,
};

#[derive(Clone, Debug)]
pub struct RetryDelays {
    pub short: Duration,
    pub long: Duration,
}

/// Declares the durable queues and their dead-letter bindings:
///
/// ```text
/// notifications --nack--> retry router --> short/long (TTL) --expire--> notifications
///                               |                    \--> dead letter (terminal)
///                               \--nack--> retry router DLQ
/// ```
pub async fn declare_topology(
    channel: &Channel,
    names: &QueueNames,
    delays: &RetryDelays,
) -> QueueResult<()> {
    declare(channel, &names.notifications, dead_letter_to(&names.retry_router, None)).await?;
    declare(channel, &names.retry_router, dead_letter_to(&names.retry_router_dlq, None)).await?;
    declare(channel, &names.retry_router_dlq, FieldTable::default()).await?;
    declare(
        channel,
        &names.retry_short,
        dead_letter_to(&names.notifications, Some(delays.short)),
    )
    .await?;
    declare(
        channel,
        &names.retry_long,
        dead_letter_to(&names.notifications, Some(delays.long)),
    )
    .await?;
    declare(channel, &names.dead_letter, FieldTable::default()).await?;

    info!("Queue topology declared");

    Ok(())
}

fn dead_letter_to(queue: &str, ttl: Option<Duration>) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(LongString::from("")),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(LongString::from(queue)),
    );

    if let Some(ttl) = ttl {
        arguments.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongLongInt(i64::try_from(duration_ms(ttl)).unwrap_or(i64::MAX)),
        );
    }

    arguments
}

async fn declare(channel: &Channel, queue: &str, arguments: FieldTable) -> QueueResult<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            arguments,
        )
        .await
        .map_err(|e| QueueError::broker("declare queue", e))?;

    info!(queue, "Queue declared");

    Ok(())
}
