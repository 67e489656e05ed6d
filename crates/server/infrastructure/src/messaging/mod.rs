// Mensajería - consumo de eventos entrantes

pub mod nats_event_consumer;

pub use nats_event_consumer::{EventConsumerError, NatsEventConsumer, NatsEventConsumerConfig};
