use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot subscribe without a transceiver in place")]
    NoTransceiver,

    #[error("cannot subscribe without a sender in place")]
    NoSender,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Rtc(#[from] webrtc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
