fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use ferry_protocol::{ClientMessage, DEFAULT_ERROR_MESSAGE, Message, ServerMessage};

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn envelope(name: &str) -> Message {
        serde_json::from_str(&load_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    fn client(name: &str) -> ClientMessage {
        ClientMessage::from_message(&envelope(name))
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"))
    }

    fn server(name: &str) -> ServerMessage {
        ServerMessage::from_message(&envelope(name))
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"))
    }

    /// Asserts the encoded form of `message` is exactly the fixture JSON.
    fn assert_encodes_as(message: Message, name: &str) {
        let fixture: serde_json::Value = serde_json::from_str(&load_fixture(name)).unwrap();
        let encoded: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(
            fixture, encoded,
            "encoding mismatch for {name}:\n  fixture: {fixture}\n  ours:    {encoded}"
        );
    }

    // --- Client frames ---

    #[test]
    fn fixture_start_upload() {
        let ClientMessage::StartUpload(m) = client("start_upload.json") else {
            panic!("expected startUpload");
        };
        assert_eq!(m.file_id, "1700000000000-k3j9x0q2a");
        assert_eq!(m.file_name, "video.mp4");
        assert_eq!(m.file_size, 600_000);

        assert_encodes_as(
            ClientMessage::StartUpload(m).to_message().unwrap(),
            "start_upload.json",
        );
    }

    #[test]
    fn fixture_chunk() {
        let ClientMessage::Chunk(m) = client("chunk.json") else {
            panic!("expected chunk");
        };
        assert_eq!(m.position, 524_288);
        assert_eq!(m.chunk, vec![0, 1, 2, 253, 254, 255]);

        assert_encodes_as(ClientMessage::Chunk(m).to_message().unwrap(), "chunk.json");
    }

    #[test]
    fn client_frames_are_not_server_frames() {
        assert!(ServerMessage::from_message(&envelope("chunk.json")).is_err());
        assert!(ClientMessage::from_message(&envelope("ready.json")).is_err());
    }

    // --- Server frames ---

    #[test]
    fn fixture_ready_and_complete() {
        let ready = server("ready.json");
        assert_eq!(ready.transfer_id(), Some("1700000000000-k3j9x0q2a"));
        assert_encodes_as(ready.to_message().unwrap(), "ready.json");

        let complete = server("complete.json");
        assert!(matches!(complete, ServerMessage::Complete(_)));
        assert_encodes_as(complete.to_message().unwrap(), "complete.json");
    }

    #[test]
    fn fixture_progress() {
        let ServerMessage::Progress(p) = server("progress.json") else {
            panic!("expected progress");
        };
        assert_eq!(p.progress, 87);
    }

    #[test]
    fn fixture_error_with_and_without_message() {
        let ServerMessage::Error(e) = server("error.json") else {
            panic!("expected error");
        };
        assert_eq!(e.message.as_deref(), Some("disk full"));
        assert_encodes_as(ServerMessage::Error(e).to_message().unwrap(), "error.json");

        let ServerMessage::Error(bare) = server("error_without_message.json") else {
            panic!("expected error");
        };
        assert!(bare.message.is_none());
        assert_eq!(
            bare.message.as_deref().unwrap_or(DEFAULT_ERROR_MESSAGE),
            DEFAULT_ERROR_MESSAGE
        );
    }

    #[test]
    fn fixture_disconnect_is_connection_level() {
        let disconnect = server("disconnect.json");
        assert_eq!(disconnect.transfer_id(), None);
        let ServerMessage::Disconnect(d) = &disconnect else {
            panic!("expected disconnect");
        };
        assert_eq!(d.reason, "server shutting down");
        assert_encodes_as(disconnect.to_message().unwrap(), "disconnect.json");
    }
}
