//! Spooled-segment resolution.
//!
//! Large result sets arrive as references to externally stored segments
//! instead of inline rows. The fetcher resolves each reference to the same
//! row shape an inline page has, so the decoder upstream never knows the
//! difference. Acknowledgements release server-side spool space and are
//! called exactly once per segment after a successful decode; a failed ack
//! is logged and swallowed, never costing the caller already-decoded rows.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{ProtocolError, TrinoError};
use crate::transport::messages::{Segment, SegmentMetadata};
use crate::transport::protocol::StatementTransport;

/// Resolves segment references through a transport.
pub struct SegmentFetcher<'a> {
    transport: &'a dyn StatementTransport,
}

impl<'a> SegmentFetcher<'a> {
    pub fn new(transport: &'a dyn StatementTransport) -> Self {
        Self { transport }
    }

    /// Resolve one segment to rows.
    ///
    /// Unsupported encodings fail before any network traffic: a corrupted
    /// or future encoding cannot be reinterpreted, so the failure is fatal
    /// and non-retryable.
    pub async fn fetch(
        &self,
        encoding: &str,
        segment: &Segment,
    ) -> Result<Vec<Vec<serde_json::Value>>, TrinoError> {
        if !is_supported_encoding(encoding) {
            return Err(ProtocolError::UnsupportedEncoding(encoding.to_string()).into());
        }

        let bytes = match segment.kind.as_str() {
            "inline" => {
                let data = segment
                    .data
                    .as_ref()
                    .ok_or(ProtocolError::MissingField("segment data"))?;
                BASE64
                    .decode(data.as_bytes())
                    .map_err(|e| ProtocolError::InvalidSegment(format!("bad base64: {e}")))?
            }
            "spooled" => {
                let uri = segment
                    .uri
                    .as_ref()
                    .ok_or(ProtocolError::MissingField("segment uri"))?;
                tracing::debug!(uri, "fetching spooled segment");
                self.transport.fetch_segment(uri).await?
            }
            other => {
                return Err(ProtocolError::MalformedEnvelope(format!(
                    "unknown segment type '{other}'"
                ))
                .into())
            }
        };

        let rows = decode_block(encoding, &bytes, &segment.metadata)?;

        if let Some(ack_uri) = &segment.ack_uri {
            if let Err(error) = self.transport.ack_segment(ack_uri).await {
                tracing::warn!(ack_uri, %error, "failed to acknowledge spooled segment");
            }
        }
        Ok(rows)
    }
}

/// Whether this client can decode the given segment encoding.
pub fn is_supported_encoding(encoding: &str) -> bool {
    matches!(encoding, "json" | "json+lz4")
}

/// Decode an encoded segment block into rows.
pub fn decode_block(
    encoding: &str,
    bytes: &[u8],
    metadata: &SegmentMetadata,
) -> Result<Vec<Vec<serde_json::Value>>, TrinoError> {
    let json = match encoding {
        "json" => bytes.to_vec(),
        "json+lz4" => {
            let uncompressed = metadata.uncompressed_size.unwrap_or(0) as usize;
            lz4_flex::block::decompress(bytes, uncompressed)
                .map_err(|e| ProtocolError::InvalidSegment(format!("lz4: {e}")))?
        }
        other => return Err(ProtocolError::UnsupportedEncoding(other.to_string()).into()),
    };
    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_slice(&json)
        .map_err(|e| ProtocolError::InvalidSegment(format!("bad row payload: {e}")))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::session::SessionSnapshot;
    use crate::transport::protocol::StatementResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn segment(json: serde_json::Value) -> Segment {
        serde_json::from_value(json).unwrap()
    }

    /// Transport stub serving one fixed segment body.
    struct FixedSegmentTransport {
        body: Vec<u8>,
        ack_fails: bool,
        acks: AtomicU32,
        fetches: AtomicU32,
    }

    impl FixedSegmentTransport {
        fn new(body: Vec<u8>) -> Self {
            Self {
                body,
                ack_fails: false,
                acks: AtomicU32::new(0),
                fetches: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StatementTransport for FixedSegmentTransport {
        async fn submit(
            &self,
            _statement: &str,
            _session: &SessionSnapshot,
        ) -> Result<StatementResponse, TrinoError> {
            unimplemented!("not used by segment tests")
        }

        async fn poll(
            &self,
            _next_uri: &str,
            _session: &SessionSnapshot,
        ) -> Result<StatementResponse, TrinoError> {
            unimplemented!("not used by segment tests")
        }

        async fn cancel(&self, _uri: &str) -> Result<(), TrinoError> {
            Ok(())
        }

        async fn fetch_segment(&self, _uri: &str) -> Result<Vec<u8>, TrinoError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }

        async fn ack_segment(&self, _uri: &str) -> Result<(), TrinoError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            if self.ack_fails {
                Err(crate::error::ConnectionError::Http {
                    status: 500,
                    message: "spool gone".to_string(),
                }
                .into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_decode_plain_json_block() {
        let rows = decode_block(
            "json",
            br#"[[1, "a"], [2, "b"]]"#,
            &SegmentMetadata::default(),
        )
        .unwrap();
        assert_eq!(rows, vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]]);
    }

    #[test]
    fn test_decode_lz4_block() {
        let payload = br#"[[1], [2], [3]]"#;
        let compressed = lz4_flex::block::compress(payload);
        let metadata = SegmentMetadata {
            uncompressed_size: Some(payload.len() as u64),
            ..SegmentMetadata::default()
        };
        let rows = decode_block("json+lz4", &compressed, &metadata).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec![json!(3)]);
    }

    #[test]
    fn test_unsupported_encoding_is_protocol_error() {
        let result = decode_block("json+zstd", b"...", &SegmentMetadata::default());
        assert!(matches!(
            result,
            Err(TrinoError::Protocol(ProtocolError::UnsupportedEncoding(e))) if e == "json+zstd"
        ));
    }

    #[test]
    fn test_corrupt_block_is_protocol_error() {
        let result = decode_block("json", b"not json", &SegmentMetadata::default());
        assert!(matches!(
            result,
            Err(TrinoError::Protocol(ProtocolError::InvalidSegment(_)))
        ));
    }

    #[tokio::test]
    async fn test_inline_segment_decodes_without_fetching() {
        let transport = FixedSegmentTransport::new(Vec::new());
        let fetcher = SegmentFetcher::new(&transport);

        // base64 of [[1],[2]]
        let encoded = BASE64.encode(br#"[[1],[2]]"#);
        let rows = fetcher
            .fetch("json", &segment(json!({"type": "inline", "data": encoded})))
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![json!(1)], vec![json!(2)]]);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spooled_segment_fetches_and_acks_once() {
        let transport = FixedSegmentTransport::new(br#"[[42]]"#.to_vec());
        let fetcher = SegmentFetcher::new(&transport);

        let rows = fetcher
            .fetch(
                "json",
                &segment(json!({
                    "type": "spooled",
                    "uri": "https://storage.example.com/seg/1",
                    "ackUri": "https://storage.example.com/seg/1/ack"
                })),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![json!(42)]]);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(transport.acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ack_failure_is_swallowed() {
        let transport = FixedSegmentTransport {
            ack_fails: true,
            ..FixedSegmentTransport::new(br#"[[7]]"#.to_vec())
        };
        let fetcher = SegmentFetcher::new(&transport);

        // Decoded rows are still delivered even though the ack failed
        let rows = fetcher
            .fetch(
                "json",
                &segment(json!({
                    "type": "spooled",
                    "uri": "https://storage.example.com/seg/2",
                    "ackUri": "https://storage.example.com/seg/2/ack"
                })),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![json!(7)]]);
        assert_eq!(transport.acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_encoding_fails_before_fetch() {
        let transport = FixedSegmentTransport::new(br#"[[1]]"#.to_vec());
        let fetcher = SegmentFetcher::new(&transport);

        let result = fetcher
            .fetch(
                "json+zstd",
                &segment(json!({"type": "spooled", "uri": "https://storage/seg"})),
            )
            .await;
        assert!(matches!(
            result,
            Err(TrinoError::Protocol(ProtocolError::UnsupportedEncoding(_)))
        ));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_uri_is_protocol_error() {
        let transport = FixedSegmentTransport::new(Vec::new());
        let fetcher = SegmentFetcher::new(&transport);
        let result = fetcher
            .fetch("json", &segment(json!({"type": "spooled"})))
            .await;
        assert!(matches!(
            result,
            Err(TrinoError::Protocol(ProtocolError::MissingField(_)))
        ));
    }
}
