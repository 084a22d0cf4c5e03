pub mod ambassador;
pub mod auth;
pub mod broadcast;
pub mod checkout;
pub mod event;
pub mod product;
pub mod profile;
pub mod settings;
pub mod social;
pub mod ticket;
