pub mod audit;
pub mod company_service;
pub mod invoice_service;
pub mod user_service;

pub use company_service::{CompanyError, CompanyService, NewCompany};
pub use invoice_service::{DocumentWithItems, InvoiceError, InvoiceService};
