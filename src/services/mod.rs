pub mod checkin;
pub mod credentials;
pub mod inventory;
pub mod orders;
pub mod payments;
