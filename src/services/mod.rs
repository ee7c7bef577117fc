// Order lifecycle services
pub mod checkout;
pub mod invoicing;
pub mod orders;
