pub mod calendar;
pub mod calendar_shares;
pub mod connection;

pub use calendar::CalendarRepository;
pub use calendar_shares::CalendarShareRepository;
pub use connection::ConnectionRepository;
