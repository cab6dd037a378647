pub mod accounts;
pub mod checkout;
pub mod ratings;
pub mod tours;

pub use accounts::AccountService;
