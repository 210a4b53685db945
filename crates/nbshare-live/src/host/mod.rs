//! Host side: shares the notebook service with guests.

mod controller;

pub use controller::HostController;
