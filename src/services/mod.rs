pub mod dispatcher;
pub mod gateway;
pub mod message;
pub mod presence;
pub mod room;
pub mod typing;
