pub mod convert;
pub mod delivery;
pub mod session;
