pub mod client {
    pub mod client;
}

pub mod format;
pub mod logger;
