pub mod model;

pub use model::{
    NewSubscription, Subscription, SubscriptionContext, SubscriptionStatus, SubscriptionTier,
    UnknownVariant,
};
