use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoalError {
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
}
