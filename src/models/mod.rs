pub mod discount;
pub mod event;
pub mod limits;
pub mod organizer;
pub mod resale;
pub mod seat;
pub mod stock;
pub mod ticket;
pub mod ticket_type;

pub use discount::{DiscountCode, DiscountType};
pub use event::{Event, EventStatus};
pub use limits::UserTicketLimits;
pub use organizer::Organizer;
pub use resale::{ResaleStatus, TicketResale};
pub use seat::{ReservationStatus, Seat, SeatReservation, SeatStatus};
pub use stock::{TicketHold, TicketStock};
pub use ticket::{Ticket, TicketStatus};
pub use ticket_type::{PriceTier, PriceTierStatus, TicketType, TicketTypeStatus};
