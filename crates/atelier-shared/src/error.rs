use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageDataError {
    #[error("Not a base64 data URL")]
    NotADataUrl,

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
