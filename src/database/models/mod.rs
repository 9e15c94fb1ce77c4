pub mod company;
pub mod conversation;
pub mod invoice;
pub mod lead;
pub mod payment;
pub mod project;
pub mod task;
pub mod user;

pub use company::Company;
pub use conversation::{Conversation, ConversationMember, ConversationSummary, Message};
pub use invoice::{DocumentKind, DocumentStatus, Invoice, InvoiceItem};
pub use lead::{Lead, LeadStatus};
pub use payment::{Payment, PaymentMethod};
pub use project::{Project, ProjectStatus};
pub use task::{Task, TaskPriority, TaskStatus};
pub use user::User;
