//! Run one proof session against a local WebSocket echo peer.
//!
//! The "computation" plays a few rounds: write a message, flush, read the
//! peer's reply. Progress is printed as it is published.
//!
//! Run with: `RUST_LOG=proofwire=debug cargo run --example loopback -p proofwire`

use std::time::Duration;

use proofwire::prelude::*;
use proofwire::{LinkRx, LinkTx, PeerLink, WebSocketLink};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ROUNDS: usize = 16;
const ROUND_BYTES: usize = 256 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("loopback=info".parse()?))
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            info!(%peer, "peer accepted a relay");
            tokio::spawn(async move {
                let link = match WebSocketLink::accept(stream).await {
                    Ok(link) => link,
                    Err(e) => {
                        tracing::warn!(error = %e, "handshake failed");
                        return;
                    }
                };
                let (mut tx, mut rx) = link.split();
                while let Ok(Some(chunk)) = rx.recv().await {
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let config = SessionConfig::from_env()?
        .with_endpoint(format!("ws://{addr}"))
        .with_expected_total((2 * ROUNDS * ROUND_BYTES) as u64)
        .with_poll_interval(Duration::from_millis(50));
    let controller = ProofController::new(config, WsConnector);

    let path = Path::from(vec![[1281189i64, 441367], [1281284, 441831]]);
    let computation = |_: &Artifact, witness: &str, io: &mut ProofIo| -> Result<String, WorkerError> {
        let mut reply = vec![0u8; ROUND_BYTES];
        for round in 0..ROUNDS {
            let message: Vec<u8> = witness.bytes().cycle().take(ROUND_BYTES).collect();
            io.write_bytes(&message)?;
            io.flush();
            io.read_exact(&mut reply)?;
            if reply != message {
                return Ok(format!("round {round}: peer reply does not match"));
            }
        }
        Ok(String::new())
    };

    let session = controller.start(Artifact::new(b"demo".to_vec()), &path, computation)?;
    let mut progress = session.progress();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            info!("progress {:.1}%", *progress.borrow_and_update());
        }
    });

    let report = session.wait().await?;
    printer.abort();
    info!(outcome = %report.outcome, bytes = report.bytes_transferred, "done");
    println!("{}", report.summary());
    Ok(())
}
