pub mod admin;
pub mod audit;
pub mod checkin;
pub mod nominee;
pub mod settings;
pub mod user;
pub mod watch;
