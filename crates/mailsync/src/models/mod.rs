//! Domain models for synchronized mail

mod item;
mod partition;
mod session;

pub use item::{Header, MailItem, MailItemBuilder, MailItemId, parse_header_date, sort_chronologically};
pub use partition::{DateRange, LegacyArchive, MonthKey, Partition};
pub use session::{Mailbox, Session, UserProfile};
