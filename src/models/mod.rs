pub mod event;
pub mod order;
pub mod payment;
pub mod ticket;

pub use event::{Event, Seat};
pub use order::{Order, OrderStatus};
pub use payment::{Payment, PaymentStatus};
pub use ticket::{Ticket, TicketCategory, TicketStatus};
