//! Persistent domain entities.

mod agent;
mod asset;
mod booking;
mod catalog;
mod custody;
mod employee;
mod knowledge;
mod notification;
mod subnet;
mod ticket;
mod visitor;

pub use agent::{AgentCommand, AgentReport, CommandStatus};
pub use asset::{Asset, AssetFilter, AssetStatus, AssetType};
pub use booking::{Booking, BookingFilter, BookingStatus, Room};
pub use catalog::{ServiceCategory, ServiceItem};
pub use custody::{CustodyFilter, CustodyItem, CustodyStatus};
pub use employee::{Department, Employee, EmployeeFilter, Location};
pub use knowledge::{slugify, ArticleFilter, KnowledgeArticle, KnowledgeCategory};
pub use notification::{Notification, RecipientType};
pub use subnet::Subnet;
pub use ticket::{Ticket, TicketFilter, TicketPriority, TicketSource, TicketStatus};
pub use visitor::{Visit, VisitFilter, VisitStatus};
