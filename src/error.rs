use std::io;
use std::path::PathBuf;
use thiserror::Error;
use std::fmt::Display;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to read config file {path}: {source}")]
    IOError { path: PathBuf, source: io::Error },

    #[error("Failed to parse config overlay: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Invalid uuid for {key}: {source}")]
    InvalidUuid { key: &'static str, source: uuid::Error },

    #[error("Invalid url for {key}: {source}")]
    InvalidUrl { key: &'static str, source: url::ParseError },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to start application (upload): {source}")]
    UploadError { #[from] source: UploadError },

    #[error("Failed to start application (io): {source}")]
    IOError { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Bluetooth is turned off")]
    RadioOff,

    #[error("Not connected to a peripheral")]
    NotConnected,

    #[error("A peripheral session is already established")]
    AlreadyConnected,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,
}

#[derive(Error, Debug)]
pub enum LocationError {
    #[error("Location access has not been granted")]
    NotAuthorized,

    #[error("Failed to read position source {path}: {source}")]
    IOError { path: PathBuf, source: io::Error },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to build http client (reqwest): {source}")]
    Client { #[from] source: reqwest::Error },

    #[error("Invalid upload url: {source}")]
    Url { #[from] source: url::ParseError },
}

pub fn error_message<T: Display>(message: &str, error: &T) -> String {
    format!("{}: {}", message, error)
}
