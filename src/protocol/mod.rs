pub mod address;
pub mod codec;
pub mod command;
pub mod crc;
pub mod switch;
