// Core module - Protocol logic independent of any concrete transport
pub mod communication;
pub mod session;
