//! End-to-end scenarios driving a real `stratad` worker loop over TCP
//! loopback with a real `libstrata::Client` — no local backend shortcut,
//! so every request actually crosses the wire codec in `strata-core`.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use libstrata::object::TransformationObject;
use libstrata::Client;
use strata_backend::{MemoryKvBackend, MemoryObjectBackend};
use strata_core::config::{BackendSpec, ClientConfig, ServerConfig, StrataConfig};
use strata_core::transform::{TransformMode, TransformType};
use strata_core::wire::Safety;
use stratad::worker::Backends;

/// Binds a fresh loopback listener, spawns the worker accept loop against
/// fresh in-memory backends, and returns a `Client` already pointed at it.
async fn spawn_server(stripe_size: u64) -> Result<Client> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let backends = Arc::new(Backends {
        object: Arc::new(MemoryObjectBackend::new()),
        kv: Arc::new(MemoryKvBackend::new()),
    });

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let backends = backends.clone();
            tokio::spawn(stratad::worker::serve_connection(
                stream,
                backends,
                stripe_size as usize,
            ));
        }
    });

    let config = StrataConfig {
        client: ClientConfig {
            object_backend: None,
            kv_backend: None,
            object_servers: vec![addr.to_string()],
            kv_servers: vec![addr.to_string()],
            ..ClientConfig::default()
        },
        server: ServerConfig {
            bind_addr: addr.to_string(),
            stripe_size,
            object_backend: BackendSpec {
                name: "posix".into(),
                path: "unused".into(),
            },
            kv_backend: BackendSpec {
                name: "sqlite".into(),
                path: "unused".into(),
            },
        },
    };

    Ok(Client::new(config))
}

// S1 — XOR round trip.
#[tokio::test]
async fn s1_xor_round_trip() -> Result<()> {
    let client = Arc::new(spawn_server(1024 * 1024).await?);
    let obj = TransformationObject::new(client, "bench", "o", 1);
    obj.create(TransformType::Xor, TransformMode::Client, Safety::Network)
        .await?;

    obj.write(&[0x41, 0x42, 0x43, 0x44], 0, Safety::Network)
        .await?;

    let (_, original_size, transformed_size, _) = obj.status().await?;
    assert_eq!(original_size, 4);
    assert_eq!(transformed_size, 4);

    let mut buf = [0u8; 4];
    obj.read(&mut buf, 0).await?;
    assert_eq!(buf, [0x41, 0x42, 0x43, 0x44]);
    Ok(())
}

// S2 — RLE whole-object write, then S3 — partial overwrite under RLE,
// continuing the same object as one sequence.
#[tokio::test]
async fn s2_and_s3_rle_whole_object_then_partial_overwrite() -> Result<()> {
    let client = Arc::new(spawn_server(1024 * 1024).await?);
    let obj = TransformationObject::new(client, "bench", "o", 1);
    obj.create(TransformType::Rle, TransformMode::Client, Safety::Network)
        .await?;

    let payload = vec![0x05u8; 300];
    obj.write(&payload, 0, Safety::Network).await?;

    let (_, original_size, transformed_size, _) = obj.status().await?;
    assert_eq!(original_size, 300);
    assert_eq!(transformed_size, 4);

    let mut window = vec![0u8; 50];
    obj.read(&mut window, 100).await?;
    assert_eq!(window, vec![0x05u8; 50]);

    // S3: ten bytes of 0x07 at offset 295.
    obj.write(&[0x07u8; 10], 295, Safety::Network).await?;

    let (_, original_size, transformed_size, _) = obj.status().await?;
    assert_eq!(original_size, 305);
    assert_eq!(transformed_size, 6);

    let mut full = vec![0u8; 305];
    obj.read(&mut full, 0).await?;
    assert_eq!(&full[..295], vec![0x05u8; 295].as_slice());
    assert_eq!(&full[295..], vec![0x07u8; 10].as_slice());
    Ok(())
}

// S4 — chunked boundaries.
#[tokio::test]
async fn s4_chunked_boundaries() -> Result<()> {
    let client = Arc::new(spawn_server(1024 * 1024).await?);
    let obj = libstrata::ChunkedTransformationObject::new(client.clone(), "bench", "tiled", 1);
    obj.create(64, TransformType::None, TransformMode::Client, Safety::Network)
        .await?;

    let input: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
    obj.write(&input, 50, Safety::Network).await?;

    // chunk names follow "{name}_{chunk_id}" (see chunked.rs); physical
    // bytes are read directly since NONE has no encoding to undo.
    let chunk0 = client.read_raw("bench", "tiled_0", 14, 50, None).await?;
    assert_eq!(chunk0, input[0..14]);

    let chunk1 = client.read_raw("bench", "tiled_1", 64, 0, None).await?;
    assert_eq!(chunk1, input[14..78]);

    let chunk2 = client.read_raw("bench", "tiled_2", 22, 0, None).await?;
    assert_eq!(chunk2, input[78..100]);

    let mut readback = vec![0u8; 100];
    obj.read(&mut readback, 50).await?;
    assert_eq!(readback, input);
    Ok(())
}

// S5 — a single OBJECT_WRITE message carrying three operation records under
// safety NONE gets zero reply ops back; the client fakes each byte counter
// from the request it sent rather than waiting on the wire.
#[tokio::test]
async fn s5_safety_none_batch_gets_zero_replies() -> Result<()> {
    let client = Arc::new(spawn_server(1024 * 1024).await?);
    client
        .create_objects("bench", &["s5".to_string()], Safety::Network)
        .await?;

    let writes = [(0u64, &[0xAAu8][..]), (1, &[0xAAu8][..]), (2, &[0xAAu8][..])];
    let counts = client
        .write_raw_multi("bench", "s5", &writes, Safety::None, None)
        .await?;
    assert_eq!(counts, vec![1, 1, 1]);
    Ok(())
}

// S6 — scratch overflow on read: one batch carrying two 768 KiB reads
// against a 1 MiB stripe forces the server to flush mid-request and start a
// fresh reply message; the client must keep looping until both reads land.
#[tokio::test]
async fn s6_scratch_overflow_splits_reads_across_replies() -> Result<()> {
    let stripe_size = 1024 * 1024;
    let client = Arc::new(spawn_server(stripe_size).await?);
    client
        .create_objects("bench", &["s6".to_string()], Safety::Network)
        .await?;

    let chunk_len = 768 * 1024usize;
    let payload = vec![0x11u8; chunk_len];
    let payload2 = vec![0x22u8; chunk_len];
    let writes = [(0u64, payload.as_slice()), (chunk_len as u64, payload2.as_slice())];
    client
        .write_raw_multi("bench", "s6", &writes, Safety::Network, None)
        .await?;

    let reads = [(chunk_len as u64, 0u64), (chunk_len as u64, chunk_len as u64)];
    let mut replies = client.read_raw_multi("bench", "s6", &reads, None).await?;
    let second = replies.pop().unwrap();
    let first = replies.pop().unwrap();
    assert_eq!(first, payload);
    assert_eq!(second, payload2);
    Ok(())
}

// Invariant 6 (safety -> reply) exercised end to end: NETWORK safety must
// surface a truthful `bytes_written`, observed via the same `write_raw`
// path the batch executor uses underneath.
#[tokio::test]
async fn invariant_safety_network_write_reports_accurate_byte_count() -> Result<()> {
    let client = Arc::new(spawn_server(1024 * 1024).await?);
    client
        .create_objects("bench", &["inv6".to_string()], Safety::Network)
        .await?;

    let n = client
        .write_raw("bench", "inv6", 0, b"twelve bytes", Safety::Network, None)
        .await?;
    assert_eq!(n, 12);
    Ok(())
}

// Multiple writes against the same remote object, issued back to back over
// the pooled connection, all land and leave a consistent final size.
#[tokio::test]
async fn sequential_writes_over_a_pooled_connection_all_land() -> Result<()> {
    let client = Arc::new(spawn_server(1024 * 1024).await?);
    client
        .create_objects("bench", &["sequential".to_string()], Safety::Network)
        .await?;

    client
        .write_raw("bench", "sequential", 0, b"hello ", Safety::Network, None)
        .await?;
    client
        .write_raw("bench", "sequential", 6, b"world", Safety::Network, None)
        .await?;

    let (_, size) = client.status_raw("bench", "sequential", None).await?;
    assert_eq!(size, 11);

    let out = client.read_raw("bench", "sequential", 11, 0, None).await?;
    assert_eq!(out, b"hello world");
    Ok(())
}
