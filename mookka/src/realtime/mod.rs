pub mod feed;
pub mod registry;

pub use feed::{BroadcastFeed, FeedListener, ReconnectConfig};
pub use registry::{ChangeCallback, Subscription, SubscriptionRegistry};
