use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("dial timed out")]
    DialTimeout,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("control frame wait was cancelled")]
    Cancelled,
    #[error("remote closed with non-normal code: {0}")]
    AbnormalClose(String),
    #[error("control response for request {id} reported an error: {message}")]
    ControlRejected { id: u64, message: String },
    #[error("no pong received within the keepalive timeout")]
    PingTimeout,
}
