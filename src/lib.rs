pub mod catalog;
pub mod clock;
pub mod config;
pub mod discounts;
pub mod external;
pub mod handlers;
pub mod holds;
pub mod models;
pub mod resale;
pub mod routes;
pub mod seats;
pub mod state;
pub mod stock;
pub mod sweeper;
pub mod utils;
