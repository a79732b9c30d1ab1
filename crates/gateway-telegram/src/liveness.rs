//! Process liveness endpoint for hosting platforms.

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

/// Router answering `GET /` with `ok`.
pub fn router() -> Router {
    Router::new().route("/", get(|| async { "ok" }))
}

/// Serve the liveness router on an already bound listener.
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Liveness endpoint listening");
    }
    axum::serve(listener, router()).await
}

/// Bind `0.0.0.0:port` and serve the liveness router.
pub async fn serve_on_port(port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_root_returns_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));
    }
}
