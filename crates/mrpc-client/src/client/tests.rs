//! Tests for the client
//!
//! The server side is played by hand over an in-memory duplex pipe, which
//! makes response order and connection failures easy to control.

#[cfg(test)]
mod tests {
    use super::super::*;
    use mrpc_common::codec::{BINARY_CODEC, JSON_CODEC};
    use mrpc_common::MAGIC;
    use std::collections::HashSet;

    /// Connects a client to the returned server-side codec.
    async fn connect(codec_type: CodecType) -> (Client, Codec) {
        connect_with_capacity(codec_type, 64 * 1024).await
    }

    /// Like `connect`, over a pipe that buffers at most `capacity` bytes.
    async fn connect_with_capacity(codec_type: CodecType, capacity: usize) -> (Client, Codec) {
        let (client_side, mut server_side) = tokio::io::duplex(capacity);
        let client = Client::new(client_side, codec_type).await.unwrap();

        let preamble = Preamble::read_from(&mut server_side).await.unwrap();
        assert_eq!(preamble.magic, MAGIC);
        assert_eq!(preamble.codec_type, codec_type);

        let new_codec = lookup_codec(preamble.codec_type).unwrap();
        (client, new_codec(Box::new(server_side)))
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (client, mut server) = connect(BINARY_CODEC).await;

        let handle = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            assert_eq!(header.service_method, "Arith.Add");
            let (a, b): (i32, i32) = server.read_body().await.unwrap();
            server
                .write(&Header::request(header.seq, &header.service_method), &(a + b))
                .await
                .unwrap();
            server
        });

        let sum: i32 = client.call("Arith.Add", &(1, 2)).await.unwrap();
        assert_eq!(sum, 3);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sequence_numbers_unique_and_out_of_order_responses() {
        let (client, mut server) = connect(BINARY_CODEC).await;

        let mut calls = Vec::new();
        for i in 0..10u64 {
            calls.push(client.go_call::<_, u64>("Echo.Seq", &i).await);
        }

        let seqs: HashSet<Seq> = calls.iter().map(|c| c.seq()).collect();
        assert_eq!(seqs.len(), 10);
        assert!(!seqs.contains(&0));

        let mut headers = Vec::new();
        for _ in 0..10 {
            let header = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
            headers.push(header);
        }

        // Answer in reverse order, echoing the sequence number as the reply
        for header in headers.iter().rev() {
            server
                .write(&Header::request(header.seq, &header.service_method), &header.seq)
                .await
                .unwrap();
        }

        for call in calls {
            let seq = call.seq();
            assert_eq!(call.await.unwrap(), seq);
        }
    }

    #[tokio::test]
    async fn test_sequence_starts_at_one() {
        let (client, mut server) = connect(BINARY_CODEC).await;

        let call = client.go_call::<_, ()>("Echo.Nothing", &()).await;
        assert_eq!(call.seq(), 1);
        assert_eq!(call.service_method(), "Echo.Nothing");
        assert_eq!(server.read_header().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_error_response() {
        let (client, mut server) = connect(BINARY_CODEC).await;

        let handle = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
            let reply = Header::request(header.seq, &header.service_method).with_error("divide by zero");
            server.write(&reply, &()).await.unwrap();
            server
        });

        let result: Result<i32> = client.call("Arith.Divide", &(1, 0)).await;
        match result {
            Err(MrpcError::Call(text)) => assert_eq!(text, "divide by zero"),
            other => panic!("expected call error, got {:?}", other),
        }

        // A call-level error leaves the connection usable
        assert!(client.is_available());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_fans_out_to_pending_calls() {
        let (client, mut server) = connect(BINARY_CODEC).await;

        let mut calls = Vec::new();
        for i in 0..3i32 {
            calls.push(client.go_call::<_, i32>("Slow.Op", &i).await);
        }
        for _ in 0..3 {
            server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
        }

        drop(server);

        for call in calls {
            assert!(matches!(call.await, Err(MrpcError::Shutdown)));
        }
        assert!(!client.is_available());

        // Fails fast without touching the connection
        let call = client.go_call::<_, i32>("Slow.Op", &4).await;
        assert_eq!(call.seq(), 0);
        assert!(matches!(call.await, Err(MrpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let (client, mut server) = connect(BINARY_CODEC).await;

        let handle = tokio::spawn(async move {
            let first = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            server
                .write(&Header::request(first.seq, &first.service_method), &111i32)
                .await
                .unwrap();

            let second = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
            server
                .write(&Header::request(second.seq, &second.service_method), &222i32)
                .await
                .unwrap();
            server
        });

        let result: Result<i32> = client
            .call_timeout("Slow.Op", &(), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(MrpcError::Timeout(50))));

        let reply: i32 = client.call("Slow.Op", &()).await.unwrap();
        assert_eq!(reply, 222);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_decode_failure_only_fails_that_call() {
        let (client, mut server) = connect(JSON_CODEC).await;

        let handle = tokio::spawn(async move {
            for reply in [serde_json::json!("not a number"), serde_json::json!(7)] {
                let header = server.read_header().await.unwrap();
                server.discard_body().await.unwrap();
                server
                    .write(&Header::request(header.seq, &header.service_method), &reply)
                    .await
                    .unwrap();
            }
            server
        });

        let bad: Result<u64> = client.call("Echo.Value", &()).await;
        assert!(matches!(bad, Err(MrpcError::JsonSerialization(_))));

        let good: u64 = client.call("Echo.Value", &()).await.unwrap();
        assert_eq!(good, 7);
        assert!(client.is_available());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_completion_channel() {
        let (client, mut server) = connect(BINARY_CODEC).await;
        let (tx, mut rx) = mpsc::channel::<Completion<String>>(4);

        let first = client.go_call_with("Echo.Say", &"a".to_string(), tx.clone()).await;
        let second = client.go_call_with("Echo.Say", &"b".to_string(), tx).await;
        assert_ne!(first, second);

        for _ in 0..2 {
            let header = server.read_header().await.unwrap();
            let text: String = server.read_body().await.unwrap();
            server
                .write(&Header::request(header.seq, &header.service_method), &text)
                .await
                .unwrap();
        }

        let mut replies = HashMap::new();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            assert_eq!(completion.service_method, "Echo.Say");
            replies.insert(completion.seq, completion.result.unwrap());
        }
        assert_eq!(replies[&first], "a");
        assert_eq!(replies[&second], "b");
    }

    #[tokio::test]
    async fn test_close() {
        let (client, mut server) = connect(BINARY_CODEC).await;

        let pending = client.go_call::<_, i32>("Slow.Op", &()).await;
        server.read_header().await.unwrap();
        server.discard_body().await.unwrap();

        client.close().await.unwrap();
        assert!(!client.is_available());
        assert!(matches!(client.close().await, Err(MrpcError::AlreadyClosed)));
        assert!(matches!(pending.await, Err(MrpcError::Shutdown)));

        // The server sees the connection end
        assert!(matches!(server.read_header().await, Err(MrpcError::Eof)));
    }

    #[tokio::test]
    async fn test_close_with_write_stuck_on_full_pipe() {
        // The server never reads, so the request cannot be flushed
        let (client, _server) = connect_with_capacity(BINARY_CODEC, 64).await;

        let caller = client.clone();
        let stuck = tokio::spawn(async move { caller.call::<_, String>("Echo.Say", &"x".repeat(4096)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), client.close())
            .await
            .expect("close waited for the stuck write")
            .unwrap();
        assert!(!client.is_available());

        let result = tokio::time::timeout(Duration::from_secs(1), stuck)
            .await
            .expect("pending call was not settled")
            .unwrap();
        assert!(matches!(result, Err(MrpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_abandoned_call_still_writes_whole_request() {
        let (client, mut server) = connect_with_capacity(BINARY_CODEC, 64).await;
        let big = "x".repeat(64 * 1024);

        // Give up while the request is still being written
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            client.call::<_, String>("Echo.Big", &big),
        )
        .await;
        assert!(abandoned.is_err());

        let caller = client.clone();
        let small = tokio::spawn(async move { caller.call::<_, u32>("Echo.Small", &7u32).await });

        let first = server.read_header().await.unwrap();
        assert_eq!(first.service_method, "Echo.Big");
        let text: String = server.read_body().await.unwrap();
        assert_eq!(text.len(), big.len());

        let second = server.read_header().await.unwrap();
        assert_eq!(second.service_method, "Echo.Small");
        let n: u32 = server.read_body().await.unwrap();
        server
            .write(&Header::request(second.seq, &second.service_method), &(n * 2))
            .await
            .unwrap();

        assert_eq!(small.await.unwrap().unwrap(), 14);
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_unencodable_request_settles_once_and_shuts_down() {
        let (client, mut server) = connect(JSON_CODEC).await;
        let (tx, mut rx) = mpsc::channel::<Completion<i32>>(4);

        // JSON object keys must be strings
        let mut args: HashMap<(i32, i32), i32> = HashMap::new();
        args.insert((1, 2), 3);

        let seq = client.go_call_with("Echo.Map", &args, tx).await;
        assert_eq!(seq, 1);

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.seq, seq);
        assert!(matches!(completion.result, Err(MrpcError::JsonSerialization(_))));
        // Nothing else is delivered for that call
        assert!(rx.recv().await.is_none());

        assert!(!client.is_available());
        let after: Result<i32> = client.call("Echo.Map", &()).await;
        assert!(matches!(after, Err(MrpcError::Shutdown)));

        // Nothing reached the server before the connection was closed
        assert!(matches!(server.read_header().await, Err(MrpcError::Eof)));
    }

    #[tokio::test]
    async fn test_dropping_last_clone_closes_connection() {
        let (client, mut server) = connect(BINARY_CODEC).await;
        let clone = client.clone();

        drop(client);
        assert!(clone.is_available());

        drop(clone);
        assert!(matches!(server.read_header().await, Err(MrpcError::Eof)));
    }

    #[tokio::test]
    async fn test_unknown_codec() {
        let (client_side, _server_side) = tokio::io::duplex(64);
        let result = Client::new(client_side, 0xbad).await;
        assert!(matches!(result, Err(MrpcError::InvalidCodec(0xbad))));
    }

    #[tokio::test]
    async fn test_preamble_write_failure() {
        let (client_side, server_side) = tokio::io::duplex(64);
        drop(server_side);

        let result = Client::new(client_side, BINARY_CODEC).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Client::dial("tcp", &addr.to_string()).await;
        assert!(result.is_err());
    }
}
