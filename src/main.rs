//! x402-chat HTTP entrypoint.
//!
//! Endpoints:
//! - `POST /api/comment` – Post on a wall; priced by how many comments the wall holds
//! - `POST /api/reply` – Reply to a top-level comment, priced like a post on its wall
//! - `POST /api/mint` – Buy CHAT with USDC
//! - `GET /api/transaction-status` – Progress of a mint transfer
//! - `GET /api/comments`, `/api/comments/latest`, `/api/comments/{id}/thread` – Read views
//! - `POST /api/comments/{id}/like` – Like or unlike a comment
//! - `GET /api/pages/popular`, `/api/pages/{owner}/price` – Wall rankings and prices
//! - `GET /health`
//!
//! Unpaid priced requests get `402 Payment Required` with x402 v1 payment requirements.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON config file
//! - `HOST`, `PORT`, `DATABASE_PATH`, `PUBLIC_URL` fill fields missing from it
//! - `OTEL_*` variables enable trace and metric export

use std::process;

use x402_chat::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
