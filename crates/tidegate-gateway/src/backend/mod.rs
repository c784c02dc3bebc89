//! Backend link: outbound sender, inbound receiver, and the tables that
//! route replies and notifications.

pub mod connection;
pub mod receiver;
pub mod subscriptions;

pub use connection::{BackendConnection, Correlation, ReplyCallback, SendOptions};
pub use receiver::{MsgPackCodec, MsgPackReceiver};
pub use subscriptions::{Subscriber, SubscriptionKey, SubscriptionTable};
