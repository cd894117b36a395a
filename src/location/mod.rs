pub mod nmea;
pub mod source;
pub mod types;
