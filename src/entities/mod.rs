//! Database entities.
//!
//! One module per table; integer primary keys throughout. `delivery_logs`
//! is the audit trail for the dispatch pipeline and the open tracker, which
//! write disjoint column sets on the same row.

pub mod delivery_log;
pub mod mailbox;
pub mod outgoing_domain;
pub mod user;

pub mod prelude {
    pub use super::delivery_log::Entity as DeliveryLogs;
    pub use super::mailbox::Entity as Mailboxes;
    pub use super::outgoing_domain::Entity as OutgoingDomains;
    pub use super::user::Entity as Users;
}
