pub mod access;
pub mod apply;
pub mod calendar_integrations;
pub mod identity;
pub mod init;
pub mod invites;
pub mod locks;
pub mod reconcile;

pub use access::ShareAccessPolicy;
pub use calendar_integrations::CalendarIntegrationService;
pub use invites::{InviteSender, InviteService, WebhookInviteSender};
pub use locks::UserLocks;
