pub mod catalogue;
pub mod feedback;
pub mod gateway;
pub mod mongodb;
pub mod session;
pub mod store;
