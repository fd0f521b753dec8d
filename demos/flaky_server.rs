//! Stand-in for the demo endpoint: `GET /` on port 3000 alternates between
//! `200 Hello World!` and `500 Internal Server Error`.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::SystemTime;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    routing::get,
    Router,
};

async fn index(
    State(count): State<Arc<AtomicU64>>,
    request: Request,
) -> (StatusCode, &'static str) {
    let seen = count.fetch_add(1, Ordering::SeqCst) + 1;
    println!(
        "Time: {:?} Request count: {} {} {}",
        SystemTime::now(),
        seen,
        request.method(),
        request.uri()
    );

    if seen % 2 == 1 {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
    }
    (StatusCode::OK, "Hello World!")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(index))
        .with_state(Arc::new(AtomicU64::new(0)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("Example app listening on port 3000");
    axum::serve(listener, app).await?;
    Ok(())
}
