//! Cluster formation (§4.8): every process is started with its own id and
//! the full `(id -> host:port)` table, and the processes connect to each
//! other until the mesh is complete. Lower-numbered processes listen,
//! higher-numbered processes dial out -- so exactly one connection, not
//! two, ends up joining any given pair.

use crate::config::{Location, Locations};
use crate::connection::{FrameReader, FrameWriter};
use crate::error::RunResult;
use crate::id::ProcessId;
use crate::runtime::Runtime;
use crate::wire::Message;
use color_eyre::eyre::eyre;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// A worker may win the race to dial out before its peer has bound its
/// listening socket; a handful of short retries smooths that over without
/// a real backoff policy (mirrors the `connect_retries` knob the teacher's
/// own runner takes).
const CONNECT_RETRIES: usize = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Connects this process to every peer in `locations` and returns once the
/// mesh is fully formed. `locations` must contain an entry for `rt.me()`.
pub async fn bootstrap(rt: &Runtime, locations: Locations) -> RunResult<()> {
    rt.set_locations(locations.clone());
    let me = rt.me();
    let my_location = *locations
        .get(&me)
        .ok_or_else(|| eyre!("no location configured for process {me}"))?;

    let listener = TcpListener::bind((my_location.host, my_location.port)).await?;
    let expected_inbound = locations.keys().filter(|&&peer| peer < me).count();

    let accept_task = {
        let rt = rt.clone();
        tokio::task::spawn_local(async move {
            for _ in 0..expected_inbound {
                match listener.accept().await {
                    Ok((stream, _)) => accept_one(&rt, stream).await,
                    Err(e) => tracing::warn!(error = %e, "failed to accept inbound connection"),
                }
            }
        })
    };

    for (&peer, &location) in locations.iter() {
        if peer <= me {
            continue;
        }
        connect_one(rt, peer, location).await?;
    }

    accept_task
        .await
        .map_err(|e| eyre!("accept loop panicked: {e}"))?;
    Ok(())
}

/// Accepts one inbound connection, reads its `Hello` to learn the peer's
/// id, then hands the connection off to the runtime's long-lived
/// reader/writer tasks (§6, "Process bootstrap payload").
async fn accept_one(rt: &Runtime, stream: TcpStream) {
    let _ = stream.set_nodelay(rt.config().tcp_nodelay());
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let peer = match reader.recv::<Message>().await {
        Some(Message::Hello { process_id, .. }) => process_id,
        Some(other) => {
            tracing::warn!(?other, "expected Hello as first message on inbound connection");
            return;
        }
        None => {
            tracing::warn!("inbound connection closed before sending Hello");
            return;
        }
    };
    rt.spawn_peer(peer, reader.into_inner(), write_half);
}

/// Dials out to `peer`, sends `Hello`, then hands the connection off the
/// same way `accept_one` does.
async fn connect_one(rt: &Runtime, peer: ProcessId, location: Location) -> RunResult<()> {
    let stream = connect_with_retries(location).await?;
    let _ = stream.set_nodelay(rt.config().tcp_nodelay());
    let (read_half, write_half) = stream.into_split();
    let mut writer = FrameWriter::new(write_half);
    writer
        .send(&Message::Hello {
            process_id: rt.me(),
            locations: rt.locations(),
        })
        .await?;
    rt.spawn_peer(peer, read_half, writer.into_inner());
    Ok(())
}

async fn connect_with_retries(location: Location) -> RunResult<TcpStream> {
    let mut last_err = None;
    for _ in 0..CONNECT_RETRIES {
        match TcpStream::connect((location.host, location.port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
    Err(last_err.expect("at least one connection attempt").into())
}
