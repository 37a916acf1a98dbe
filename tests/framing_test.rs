mod common;

use common::{layout, quiet_config, start_server, TestClient};
use padlink::protocol::{ClientMessage, ServerMessage};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// The server reassembles frames from arbitrarily fragmented TCP reads:
/// a whole handshake delivered one byte at a time still joins
#[tokio::test]
async fn test_server_reassembles_byte_by_byte_handshake() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();
    let port = start_server(quiet_config()).await;

    let mut a = TestClient::connect(port).await;
    a.join("A", layout(1)).await;

    // Raw socket for the dripping peer; reuse the helper only for reads.
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect failed");

    // Two concatenated frames, written byte by byte.
    let mut wire = Vec::new();
    wire.extend_from_slice(
        &ClientMessage::Name {
            name: "Drip".to_string(),
        }
        .encode()
        .into_frame()
        .expect("encode failed"),
    );
    wire.extend_from_slice(
        &ClientMessage::Controllers {
            controllers: layout(1),
        }
        .encode()
        .into_frame()
        .expect("encode failed"),
    );
    for byte in wire {
        stream.write_all(&[byte]).await.expect("write failed");
        stream.flush().await.expect("flush failed");
    }

    // Both frames arrived intact: the dripping peer joined.
    match a
        .recv_matching(|m| matches!(m, ServerMessage::Join { .. }))
        .await
    {
        ServerMessage::Join { id, name } => {
            assert_eq!(id, 1);
            assert_eq!(name, "Drip");
        }
        _ => unreachable!(),
    }
}

/// Two messages written in one TCP segment are processed as two frames,
/// in order
#[tokio::test]
async fn test_server_splits_concatenated_frames() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();
    let port = start_server(quiet_config()).await;

    let mut a = TestClient::connect(port).await;
    a.join("A", layout(1)).await;
    let mut b = TestClient::connect(port).await;
    b.join("B", layout(1)).await;

    a.recv_matching(|m| matches!(m, ServerMessage::Join { id: 1, .. }))
        .await;
    a.recv_allocation(2).await;

    // Two chat frames in a single write.
    let mut wire = Vec::new();
    for text in ["first", "second"] {
        wire.extend_from_slice(
            &ClientMessage::Message {
                text: text.to_string(),
            }
            .encode()
            .into_frame()
            .expect("encode failed"),
        );
    }
    b.send_raw(&wire).await;

    for expected in ["first", "second"] {
        match a.recv().await {
            ServerMessage::Message { sender_id, text } => {
                assert_eq!(sender_id, 1);
                assert_eq!(text, expected);
            }
            other => panic!("expected chat {expected:?}, got {other:?}"),
        }
    }
}

/// A malformed frame closes only the offending session
#[tokio::test]
async fn test_malformed_frame_closes_only_offender() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();
    let port = start_server(quiet_config()).await;

    let mut a = TestClient::connect(port).await;
    a.join("A", layout(1)).await;
    let mut b = TestClient::connect(port).await;
    b.join("B", layout(1)).await;

    a.recv_matching(|m| matches!(m, ServerMessage::Join { id: 1, .. }))
        .await;
    a.recv_allocation(2).await;

    // An unknown opcode in a well-formed frame.
    b.send_raw(&[0x00, 0x01, 0x7F]).await;
    b.expect_close().await;

    // A stays up and hears the departure.
    match a.recv().await {
        ServerMessage::Quit { id } => assert_eq!(id, 1),
        other => panic!("expected QUIT for the offender, got {other:?}"),
    }
    a.recv_allocation(1).await;
}
