pub mod bus;
pub mod stream;
pub mod token;
