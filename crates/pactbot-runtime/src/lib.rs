//! Publish-side runtime: when to drain aggregators and how drained events
//! reach the chat channel.

mod policy;
mod publisher;
mod scheduler;

pub use policy::{
    PublishPolicy, PublishPolicyConfig, DEFAULT_BUSINESS_HOURS_CRON, DEFAULT_OFF_HOURS_CRON,
    DEFAULT_POLICY_TIMEZONE, DEFAULT_WEEKEND_CRON,
};
pub use publisher::{publish_events, PublishReport};
pub use scheduler::{
    run_publish_cycle, run_registry_publish_cycle, start_publish_scheduler, PublishSchedulerConfig,
    PublishSchedulerHandle,
};
