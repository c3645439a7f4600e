use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("start-timestamp space exhausted, reached {0}")]
    Exhausted(u64),
}
