pub mod ambassadors;
pub mod broadcast;
pub mod catalog;
pub mod checkout;
pub mod email;
pub mod events;
pub mod inventory;
pub mod metrics;
pub mod notifications;
pub mod profiles;
pub mod settings;
pub mod social;
pub mod stripe;
pub mod tickets;
pub mod webhook;
