use tokio::io::AsyncRead;

use crate::{FrameReceiver, LEN_TYPE_SIZE, LenType, Result};

/// Encodes `vector` into a complete frame.
///
/// # Arguments
/// * `vector` - The floats to encode.
///
/// # Returns
/// The 8 byte big-endian length header followed by the payload.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let payload: &[u8] = bytemuck::cast_slice(vector);
    let header = (payload.len() as LenType).to_be_bytes();

    let mut buf = Vec::with_capacity(LEN_TYPE_SIZE + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    buf
}

/// Decodes a single frame from `reader`.
///
/// Use a `FrameReceiver` instead when reading many frames from the same stream,
/// it keeps partial reads across cancellations and reuses its state.
///
/// # Arguments
/// * `reader` - The stream to read the frame from.
///
/// # Returns
/// The decoded vector or a `FrameErr`.
pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<f32>> {
    FrameReceiver::new(reader).recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameErr;

    #[test]
    fn header_is_big_endian_byte_count() {
        let frame = encode(&[1.0, 1.0, 1.0]);

        assert_eq!(frame.len(), 8 + 12);
        assert_eq!(&frame[..8], &[0, 0, 0, 0, 0, 0, 0, 12]);
        assert_eq!(&frame[8..12], bytemuck::bytes_of(&1.0f32));
    }

    #[tokio::test]
    async fn decode_reads_back_encoded_vector() {
        let vector = vec![0.5, -3.25, f32::MAX, f32::MIN_POSITIVE, 0.0];
        let frame = encode(&vector);

        let decoded = decode(&mut frame.as_slice()).await.unwrap();
        assert_eq!(decoded, vector);
    }

    #[tokio::test]
    async fn closed_before_header_is_peer_closed() {
        let frame = encode(&[1.0]);

        let res = decode(&mut &frame[..5]).await;
        assert!(matches!(res, Err(FrameErr::PeerClosed)));

        let mut empty: &[u8] = &[];
        let res = decode(&mut empty).await;
        assert!(matches!(res, Err(FrameErr::PeerClosed)));
    }

    #[tokio::test]
    async fn closed_mid_payload_is_truncated() {
        let frame = encode(&[1.0, 2.0]);

        let res = decode(&mut &frame[..13]).await;
        assert!(matches!(
            res,
            Err(FrameErr::TruncatedPayload {
                expected: 8,
                got: 5
            })
        ));
    }

    #[tokio::test]
    async fn length_not_multiple_of_four_is_malformed() {
        let mut frame = 6u64.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0; 6]);

        let res = decode(&mut frame.as_slice()).await;
        assert!(matches!(res, Err(FrameErr::Malformed { len: 6 })));
    }
}
